//! The sandboxed Lua runtime each plugin execution context runs inside.
//!
//! Strips filesystem/network/process-spawning surfaces from the Lua standard library and
//! enforces a wall-clock timeout via instruction counting, since `mlua` has no native
//! preemption hook.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, Result as LuaResult, Value};

/// Memory ceiling per plugin execution context.
pub const MEMORY_LIMIT: usize = 10 * 1024 * 1024;

/// Fire the instruction-counting hook this often; tuned so the wall-clock check below
/// runs often enough to catch a timeout without dominating the cost of a tight loop.
const HOOK_INTERVAL_INSTRUCTIONS: u32 = 1000;

/// A single isolated Lua state plus the limits it enforces on every call routed through it.
pub struct ScriptSandbox {
    lua: Lua,
    timeout: Duration,
}

impl ScriptSandbox {
    pub fn new(timeout: Duration) -> LuaResult<Self> {
        Self::with_memory_limit(timeout, MEMORY_LIMIT)
    }

    pub fn with_memory_limit(timeout: Duration, memory_limit: usize) -> LuaResult<Self> {
        let lua = Lua::new();
        lua.set_memory_limit(memory_limit)?;
        Self::strip_dangerous_globals(&lua)?;
        Ok(Self { lua, timeout })
    }

    fn strip_dangerous_globals(lua: &Lua) -> LuaResult<()> {
        let globals = lua.globals();
        for name in [
            "io",
            "os",
            "debug",
            "package",
            "require",
            "load",
            "loadfile",
            "dofile",
            "loadstring",
            "collectgarbage",
        ] {
            globals.set(name, Value::Nil)?;
        }
        Ok(())
    }

    /// The Lua state, for installing the host API table before loading plugin source.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Runs `f` with a wall-clock deadline enforced through an instruction-counting hook.
    /// A timeout surfaces as an `mlua::Error::RuntimeError` the caller can distinguish by
    /// message (see `script::error`'s `From<mlua::Error>` classifiers).
    pub fn execute<F, R>(&self, f: F) -> LuaResult<R>
    where
        F: FnOnce(&Lua) -> LuaResult<R>,
    {
        let deadline = Instant::now() + self.timeout;
        let timed_out = Arc::new(AtomicBool::new(false));
        let timed_out_clone = Arc::clone(&timed_out);
        let ticks = Arc::new(AtomicU64::new(0));
        let ticks_clone = Arc::clone(&ticks);

        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INTERVAL_INSTRUCTIONS),
            move |_lua, _debug| {
                ticks_clone.fetch_add(1, Ordering::Relaxed);
                if Instant::now() >= deadline {
                    timed_out_clone.store(true, Ordering::SeqCst);
                    Err(mlua::Error::RuntimeError("execution timeout".to_string()))
                } else {
                    Ok(mlua::VmState::Continue)
                }
            },
        );

        let result = f(&self.lua);
        self.lua.remove_hook();

        if timed_out.load(Ordering::SeqCst) {
            return Err(mlua::Error::RuntimeError("execution timeout".to_string()));
        }
        result
    }

    pub fn memory_used(&self) -> usize {
        self.lua.used_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executes_simple_script() {
        let sandbox = ScriptSandbox::new(Duration::from_millis(200)).unwrap();
        let result: i64 = sandbox.execute(|lua| lua.load("return 1 + 1").eval()).unwrap();
        assert_eq!(result, 2);
    }

    #[test]
    fn blocks_io() {
        let sandbox = ScriptSandbox::new(Duration::from_millis(200)).unwrap();
        let result: LuaResult<()> = sandbox.execute(|lua| lua.load("io.open('x', 'r')").exec());
        assert!(result.is_err());
    }

    #[test]
    fn blocks_os() {
        let sandbox = ScriptSandbox::new(Duration::from_millis(200)).unwrap();
        let result: LuaResult<()> = sandbox.execute(|lua| lua.load("os.execute('echo hi')").exec());
        assert!(result.is_err());
    }

    #[test]
    fn blocks_require_and_load() {
        let sandbox = ScriptSandbox::new(Duration::from_millis(200)).unwrap();
        assert!(sandbox
            .execute(|lua| lua.load("require('os')").exec())
            .is_err());
        assert!(sandbox
            .execute(|lua| lua.load("load('return 1')()").exec())
            .is_err());
    }

    #[test]
    fn enforces_timeout() {
        let sandbox = ScriptSandbox::new(Duration::from_millis(20)).unwrap();
        let result: LuaResult<()> = sandbox.execute(|lua| lua.load("while true do end").exec());
        assert!(result.is_err());
    }

    #[test]
    fn allows_string_and_table_operations() {
        let sandbox = ScriptSandbox::new(Duration::from_millis(200)).unwrap();
        let upper: String = sandbox
            .execute(|lua| lua.load("return string.upper('hi')").eval())
            .unwrap();
        assert_eq!(upper, "HI");
    }
}
