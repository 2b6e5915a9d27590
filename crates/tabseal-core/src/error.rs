use thiserror::Error;

/// Canonical result for core and every crate layered on it.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Primary key is not unique. This is a configuration error: the declared
    /// key does not identify rows.
    #[error("primary key is not unique in {side}; duplicates found (sample={sample:?})")]
    KeyCollision { side: String, sample: Vec<String> },

    #[error("schema error: {0}")]
    Schema(String),

    // Core does no I/O; higher layers map store failures into this variant.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    /// Stable short name used when a failure is recorded inside a sealed payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::KeyCollision { .. } => "key_collision",
            Error::Schema(_) => "schema",
            Error::Storage(_) => "storage",
            Error::Integrity(_) => "integrity",
            Error::State(_) => "state",
            Error::Serialize(_) => "serialize",
            Error::Invariant(_) => "invariant",
        }
    }

    /// Attribute a key collision to one side of a diff (`input`/`output`).
    pub fn on_side(self, side: &str) -> Self {
        match self {
            Error::KeyCollision { sample, .. } => Error::KeyCollision {
                side: side.to_string(),
                sample,
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialize(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(format!("yaml: {e}"))
    }
}
