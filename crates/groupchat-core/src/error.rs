use thiserror::Error;

/// Errors raised by the persistence layer (snapshot load/save).
///
/// A [`SnapshotError`] hit while loading at startup is fatal and the process
/// exits; a write failure during the background save loop is only logged,
/// and the next version change retries the write.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_yaml::Error),

    #[error("snapshot violates nick uniqueness: {0}")]
    DuplicateNick(String),
}

/// Errors surfaced by [`crate::dispatcher::CommandDispatcher`] internals.
///
/// These never escape to the caller as `Result` — every one is converted to
/// an italicized reply delivered only to the issuing user. The enum exists
/// so command bodies can use `?`/early-return instead of threading reply
/// strings through every branch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unparsable command; try */help*.")]
    Unparsable,

    #[error("Unknown command \"{0}\"; try */help*.")]
    UnknownCommand(String),

    #[error("{0}")]
    Validation(String),
}
