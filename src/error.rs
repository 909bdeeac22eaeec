use crate::KeyFunctionId;

/// Errors raised while building, saving or loading a perfect hash table.
///
/// An exhausted construction attempt is not an error: see
/// [`PerfectHashBuilder::initialize`](crate::PerfectHashBuilder::initialize).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested key function is not present in the registry.
    #[error("unknown key function identifier: {0}")]
    UnknownIdentifier(KeyFunctionId),

    /// `initialize` was called before any entry was set.
    #[error("cannot build a perfect hash table from an empty key set")]
    EmptyKeySet,

    /// `save` was called on a builder that has not been built successfully.
    #[error("perfect hash table has not been built")]
    NotBuilt,

    /// The builder already ran its construction attempt.
    #[error("builder has already been initialized")]
    AlreadyInitialized,

    /// A construction parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every attempt of the retry driver was exhausted.
    #[error("construction failed after {attempts} attempts")]
    ConstructionFailed {
        /// Total number of `initialize` calls made.
        attempts: usize,
    },

    /// The persisted record is malformed.
    #[error("corrupt table data: {0}")]
    CorruptData(String),

    /// I/O error from the underlying reader or writer.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptData(message.into())
}
