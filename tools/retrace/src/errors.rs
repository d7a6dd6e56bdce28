use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetraceError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("recording parse error: {0}")]
    RecordingParse(String),
    #[error("unregistered record kind: {0}")]
    UnregisteredKind(String),
    #[error("replay miss for {kind}: no recorded call matches params {params}")]
    ReplayMiss { kind: String, params: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("process error: {0}")]
    Process(String),
}
