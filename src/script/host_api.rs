//! The minimal API exposed into every plugin's sandbox: `get_args`, `url_encode`,
//! `url_encode_path` (§4.A). These are installed as globals, not namespaced under a
//! table, matching how the plugin bundle in `commands/` calls them directly.

use mlua::{Lua, Result as LuaResult};

/// Returns the argument tail of `full_args`, treating `binding` as the command prefix.
pub fn get_args(full_args: &str, binding: &str) -> String {
    let trimmed = full_args.trim_start();

    // `binding.len()` is a byte count; it may fall outside `trimmed`'s char boundaries
    // (e.g. splitting a multi-byte character), which would panic a raw `split_at`. A
    // plugin running under the sandbox must never be able to crash the host this way.
    let rest = match trimmed.get(binding.len()..) {
        Some(rest) => {
            let head = &trimmed[..binding.len()];
            if !head.eq_ignore_ascii_case(binding) {
                return String::new();
            }
            rest
        }
        None => return String::new(),
    };

    if rest.is_empty() {
        return String::new();
    }

    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return String::new();
    }

    rest.trim_start().to_string()
}

/// `application/x-www-form-urlencoded`: spaces become `+`.
pub fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// RFC 3986 path-segment percent-encoding: `/` is preserved, spaces become `%20`.
pub fn url_encode_path(s: &str) -> String {
    s.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Installs the host API as globals on `lua`. Must run before any plugin source is loaded
/// into the same state.
pub fn install(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    globals.set(
        "get_args",
        lua.create_function(|_, (full_args, binding): (String, String)| {
            Ok(get_args(&full_args, &binding))
        })?,
    )?;

    globals.set(
        "url_encode",
        lua.create_function(|_, s: String| Ok(url_encode(&s)))?,
    )?;

    globals.set(
        "url_encode_path",
        lua.create_function(|_, s: String| Ok(url_encode_path(&s)))?,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_args_strips_matching_binding() {
        assert_eq!(get_args("gh facebook/react", "gh"), "facebook/react");
        assert_eq!(get_args("  gh   facebook/react", "gh"), "facebook/react");
    }

    #[test]
    fn get_args_is_case_insensitive_on_binding_match() {
        assert_eq!(get_args("GH facebook/react", "gh"), "facebook/react");
    }

    #[test]
    fn get_args_does_not_panic_when_binding_length_splits_a_multibyte_char() {
        // "é" is two UTF-8 bytes; a one-byte binding lands mid-character.
        assert_eq!(get_args("éx rest", "g"), "");
        // Binding longer than the whole (multi-byte) input must also not panic.
        assert_eq!(get_args("é", "ghij"), "");
        assert_eq!(get_args("é", "gh"), "");
    }

    #[test]
    fn get_args_empty_when_binding_is_whole_input() {
        assert_eq!(get_args("gh", "gh"), "");
    }

    #[test]
    fn get_args_empty_on_mismatch() {
        assert_eq!(get_args("yt rust tutorial", "gh"), "");
        assert_eq!(get_args("ghost of tsushima", "gh"), "");
    }

    #[test]
    fn url_encode_uses_plus_for_space() {
        assert_eq!(url_encode("rust tutorial"), "rust+tutorial");
    }

    #[test]
    fn url_encode_path_preserves_slash_and_encodes_space() {
        assert_eq!(url_encode_path("hello world"), "hello%20world");
        assert_eq!(url_encode_path("facebook/react"), "facebook/react");
        assert_eq!(url_encode_path("hello world/again"), "hello%20world/again");
    }

    #[test]
    fn host_api_reachable_from_lua() {
        let lua = Lua::new();
        install(&lua).unwrap();
        let result: String = lua
            .load(r#"return get_args("gh facebook/react", "gh")"#)
            .eval()
            .unwrap();
        assert_eq!(result, "facebook/react");
    }
}
