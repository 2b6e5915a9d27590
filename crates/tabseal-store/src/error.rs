use thiserror::Error;

/// Result type local to tabseal-store.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unsupported codec: {0}")]
    CodecUnsupported(&'static str),

    #[error("store configuration error: {0}")]
    Config(String),
}

impl From<Error> for tabseal_core::error::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(msg) => tabseal_core::error::Error::Config(msg),
            other => tabseal_core::error::Error::Storage(other.to_string()),
        }
    }
}
