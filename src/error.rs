use std::path::PathBuf;

/// Crate-wide error type. Every fallible operation in `ygit` returns one of
/// these variants rather than a bare `std::io::Error`, so callers can match
/// on the kind of failure the way the design doc enumerates them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error talking to {host}: {source}")]
    Network {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote error (http {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("authentication required for {url} (http {status})")]
    AuthenticationRequired { url: String, status: u16 },

    #[error("out of memory allocating the {requested} byte inflate window ({free} bytes free)")]
    Memory { requested: usize, free: usize },

    #[error("unknown ref: {0}")]
    UnknownRef(String),

    #[error("unknown object kind {0}")]
    UnknownObjectKind(u8),

    #[error("unsupported object representation: {0}")]
    UnsupportedObject(&'static str),

    #[error("missing object {0}")]
    MissingObject(String),

    #[error("corrupt repository: object {0} missing even after backfill")]
    CorruptRepository(String),

    #[error("repo already exists at {0}")]
    RepoAlreadyExists(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
