// =============================================================================
// Typed error kinds
// =============================================================================
//
// Workers and read APIs catch broadly and degrade (skip a unit of work,
// return a safe default). Only startup propagates a `CoreError`, and only as
// one of the variants below — never a stringly-typed catch-all.
//
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to open store at {path}: {source}")]
    StoreOpen {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema initialization failed: {0}")]
    SchemaInit(#[source] rusqlite::Error),

    #[error("another instance is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("failed to acquire instance lock at {path}: {source}")]
    InstanceLock {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is present but could not be parsed: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config file {path} could not be read: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;
