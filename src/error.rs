use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("Invalid render settings: {0}")]
    InvalidSettings(String),

    #[error("Missing {purpose} image for task {id}")]
    MissingImage { id: String, purpose: String },

    #[error("Task {0} is already queued or running")]
    TaskActive(String),

    #[error("Failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Telemetry query failed: {0}")]
    Telemetry(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Render engine has stopped")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, Error>;
