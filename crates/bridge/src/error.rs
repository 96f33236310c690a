use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("origin mismatch: expected {expected}, got {actual}")]
    OriginMismatch { expected: String, actual: String },

    #[error("no route to tool source: {0}")]
    Routing(String),

    #[error("elicitation timed out")]
    ElicitationTimeout,

    #[error("an elicitation is already pending for guest '{0}'")]
    ElicitationInFlight(String),

    #[error("elicitation rejected: {0}")]
    ElicitationRejected(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Channel(#[from] channel::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
