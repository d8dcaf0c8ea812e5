use std::{io, path::PathBuf};

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("forward plan references layer `{name}` which was never declared")]
    UndeclaredLayer { name: String },

    #[error("layer `{name}` is declared more than once")]
    DuplicateLayer { name: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("dataset unavailable at {}: {source}", path.display())]
    DatasetUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed dataset file {}: {reason}", path.display())]
    MalformedDataset { path: PathBuf, reason: String },

    #[error("loss history line {line}: {reason}")]
    LossHistory { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
