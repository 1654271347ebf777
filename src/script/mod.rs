//! The Script Host (§4.A): loads one plugin's source into an isolated sandbox and
//! invokes its `info()`/`process()` entry points under strict resource bounds.

pub mod error;
pub mod host_api;
pub mod sandbox;

use std::path::Path;
use std::time::Duration;

use sandbox::ScriptSandbox;

pub use error::{InfoError, LoadError, ProcessError};

/// Reads a string field from an `info()` metadata table. An absent field is fine and
/// defaults to empty (§4.A: "may be empty"); a field present but not a string is
/// malformed and must surface as an error rather than silently coercing to empty.
fn optional_string_field(table: &mlua::Table, key: &str) -> mlua::Result<String> {
    match table.get::<mlua::Value>(key)? {
        mlua::Value::Nil => Ok(String::new()),
        mlua::Value::String(s) => s
            .to_str()
            .map(|s| s.to_string())
            .map_err(|_| mlua::Error::RuntimeError(format!("malformed metadata: {key}"))),
        _ => Err(mlua::Error::RuntimeError(format!("malformed metadata: {key}"))),
    }
}

/// A plugin's declared metadata, as returned by its `info()` function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub bindings: Vec<String>,
    pub description: String,
    pub example: String,
}

/// One loaded, isolated plugin execution context. Not `Sync` — callers share it only via
/// the checkout discipline in [`crate::script::pool`].
pub struct PluginContext {
    sandbox: ScriptSandbox,
}

impl PluginContext {
    /// Loads `source_path` into a fresh sandbox and validates that it defines both
    /// `info` and `process` as callables.
    pub fn load(source_path: &Path, timeout: Duration) -> Result<Self, LoadError> {
        let source = std::fs::read_to_string(source_path)?;
        let sandbox = ScriptSandbox::new(timeout)?;
        host_api::install(sandbox.lua())?;

        sandbox.execute(|lua| {
            lua.load(&source)
                .set_name(source_path.to_string_lossy().as_ref())
                .exec()
        })?;

        let globals = sandbox.lua().globals();
        let has_info = globals.get::<mlua::Function>("info").is_ok();
        let has_process = globals.get::<mlua::Function>("process").is_ok();
        if !has_info || !has_process {
            return Err(LoadError::MissingEntryPoints);
        }

        Ok(Self { sandbox })
    }

    /// Invokes the plugin's `info()` and validates the returned metadata.
    pub fn info(&self) -> Result<PluginMetadata, InfoError> {
        let result: Result<(Vec<String>, String, String), mlua::Error> =
            self.sandbox.execute(|lua| {
                let info_fn: mlua::Function = lua.globals().get("info")?;
                let table: mlua::Table = info_fn.call(())?;
                let bindings: Vec<String> = table.get("bindings").map_err(|_| {
                    mlua::Error::RuntimeError("malformed metadata: bindings".to_string())
                })?;
                let description = optional_string_field(&table, "description")?;
                let example = optional_string_field(&table, "example")?;
                Ok((bindings, description, example))
            });

        match result {
            Ok((bindings, description, example)) if bindings.is_empty() => {
                let _ = (description, example);
                Err(InfoError::NoBindings)
            }
            Ok((bindings, description, example)) => Ok(PluginMetadata {
                bindings,
                description,
                example,
            }),
            Err(err) => Err(InfoError::from(err)),
        }
    }

    /// Invokes the plugin's `process(full_args)` with the full, post-alias-expansion query.
    pub fn process(&self, query: &str) -> Result<String, ProcessError> {
        let result: Result<mlua::Value, mlua::Error> = self.sandbox.execute(|lua| {
            let process_fn: mlua::Function = lua.globals().get("process")?;
            process_fn.call(query.to_string())
        });

        match result {
            Ok(mlua::Value::String(s)) => {
                s.to_str().map(|s| s.to_string()).map_err(|_| ProcessError::NotAString)
            }
            Ok(_) => Err(ProcessError::NotAString),
            Err(err) => Err(ProcessError::from(err)),
        }
    }
}

pub mod pool;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_plugin(dir: &TempDir, name: &str, source: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, source).unwrap();
        path
    }

    const GH_PLUGIN: &str = r#"
        function info()
            return {
                bindings = {"gh"},
                description = "Jump to a GitHub repository",
                example = "gh facebook/react",
            }
        end

        function process(full_args)
            local args = get_args(full_args, "gh")
            if args == "" then
                return "https://github.com"
            end
            return "https://github.com/" .. url_encode_path(args)
        end
    "#;

    #[test]
    fn loads_and_reports_metadata() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(&dir, "gh.lua", GH_PLUGIN);
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        let meta = ctx.info().unwrap();
        assert_eq!(meta.bindings, vec!["gh".to_string()]);
        assert_eq!(meta.example, "gh facebook/react");
    }

    #[test]
    fn processes_a_query() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(&dir, "gh.lua", GH_PLUGIN);
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        let url = ctx.process("gh facebook/react").unwrap();
        assert_eq!(url, "https://github.com/facebook/react");
    }

    #[test]
    fn processes_bare_binding() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(&dir, "gh.lua", GH_PLUGIN);
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        assert_eq!(ctx.process("gh").unwrap(), "https://github.com");
    }

    #[test]
    fn rejects_plugin_missing_entry_points() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(&dir, "broken.lua", "function info() return {} end");
        let result = PluginContext::load(&path, Duration::from_millis(200));
        assert!(matches!(result, Err(LoadError::MissingEntryPoints)));
    }

    #[test]
    fn rejects_metadata_without_bindings() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "nobindings.lua",
            r#"
            function info() return { bindings = {} } end
            function process(q) return "https://example.com" end
            "#,
        );
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        assert!(matches!(ctx.info(), Err(InfoError::NoBindings)));
    }

    #[test]
    fn missing_description_and_example_default_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "bare.lua",
            r#"
            function info() return { bindings = {"x"} } end
            function process(q) return "https://example.com" end
            "#,
        );
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        let meta = ctx.info().unwrap();
        assert_eq!(meta.description, "");
        assert_eq!(meta.example, "");
    }

    #[test]
    fn rejects_metadata_with_mistyped_description() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "badmeta.lua",
            r#"
            function info() return { bindings = {"x"}, description = 42 } end
            function process(q) return "https://example.com" end
            "#,
        );
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        assert!(matches!(ctx.info(), Err(InfoError::MalformedMetadata)));
    }

    #[test]
    fn rejects_metadata_with_mistyped_example() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "badmeta2.lua",
            r#"
            function info() return { bindings = {"x"}, example = {} } end
            function process(q) return "https://example.com" end
            "#,
        );
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        assert!(matches!(ctx.info(), Err(InfoError::MalformedMetadata)));
    }

    #[test]
    fn rejects_process_result_that_is_not_a_string() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "badoutput.lua",
            r#"
            function info() return { bindings = {"x"} } end
            function process(q) return 42 end
            "#,
        );
        let ctx = PluginContext::load(&path, Duration::from_millis(200)).unwrap();
        assert!(matches!(ctx.process("x"), Err(ProcessError::NotAString)));
    }

    #[test]
    fn reports_timeout_on_infinite_loop() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "slow.lua",
            r#"
            function info() return { bindings = {"slow"} } end
            function process(q) while true do end end
            "#,
        );
        let ctx = PluginContext::load(&path, Duration::from_millis(20)).unwrap();
        assert!(matches!(ctx.process("slow"), Err(ProcessError::Timeout)));
    }
}
