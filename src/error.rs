use thiserror::Error;

/// Fatal failures. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unable to resolve queue '{identifier}': {reason}")]
    Resolution { identifier: String, reason: String },

    #[error("unable to read {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to send message: {0}")]
    Send(String),

    #[error("unable to report send: {0}")]
    Report(#[source] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unable to build status payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}
