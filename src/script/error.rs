//! Error hierarchy for the Script Host (§4.A, §7's per-kind table).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read plugin source: {0}")]
    Io(#[from] std::io::Error),
    #[error("script error while loading plugin: {0}")]
    Script(String),
    #[error("plugin does not define both `info` and `process`")]
    MissingEntryPoints,
    #[error("plugin exceeded its resource limits while loading: {0}")]
    Resource(String),
}

#[derive(Debug, Error)]
pub enum InfoError {
    #[error("script error while calling info(): {0}")]
    Script(String),
    #[error("info() did not return a table with `bindings`, `description`, `example`")]
    MalformedMetadata,
    #[error("info() declared no bindings")]
    NoBindings,
    #[error("info() call exceeded its timeout")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("script error while calling process(): {0}")]
    Script(String),
    #[error("process() did not return a string")]
    NotAString,
    #[error("process() call exceeded its timeout")]
    Timeout,
}

impl From<mlua::Error> for LoadError {
    fn from(err: mlua::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("memory") || msg.contains("Memory") {
            LoadError::Resource(msg)
        } else {
            LoadError::Script(msg)
        }
    }
}

impl From<mlua::Error> for InfoError {
    fn from(err: mlua::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("timeout") || msg.contains("Timeout") || msg.contains("limit") {
            InfoError::Timeout
        } else if msg.contains("malformed metadata") {
            InfoError::MalformedMetadata
        } else {
            InfoError::Script(msg)
        }
    }
}

impl From<mlua::Error> for ProcessError {
    fn from(err: mlua::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("timeout") || msg.contains("Timeout") || msg.contains("limit") {
            ProcessError::Timeout
        } else {
            ProcessError::Script(msg)
        }
    }
}
