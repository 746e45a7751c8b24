use std::path::PathBuf;

use crate::types::Ref;

/// error type for casket operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("blob not found: {0}")]
    BlobNotFound(Ref),

    #[error("pin not found: {0}")]
    PinNotFound(String),

    #[error("invalid ref: zero ref where a content ref is required")]
    InvalidRef,

    #[error("invalid ref string: {0}")]
    RefParse(String),

    #[error("ref mismatch: expected {exp}, got {got}")]
    RefMismatch { exp: Ref, got: Ref },

    #[error("invalid pin name: {0}")]
    InvalidPinName(String),

    #[error("blob is not a schema object")]
    NotSchema,

    #[error("unknown schema type: {0}")]
    UnknownType(String),

    #[error("blob writer already completed")]
    BlobCompleted,

    #[error("blob writer already discarded")]
    BlobDiscarded,

    #[error("file changed while storing it: {0}")]
    FileChanged(PathBuf),

    #[error("copy-on-write clone not supported")]
    CloneUnsupported,

    #[error("operation not supported by this storage: {0}")]
    NotSupported(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("xattr error on {path}: {message}")]
    Xattr { path: PathBuf, message: String },
}

impl Error {
    /// true for the missing-blob and missing-pin cases
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::BlobNotFound(_) | Error::PinNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
