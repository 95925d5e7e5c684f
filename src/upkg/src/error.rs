//! Error taxonomy for package ingestion.
//!
//! Every failure maps onto one of five kinds (see [`ErrorKind`]). Callers
//! attach breadcrumbs with [`ResultExt::context`] while a failure bubbles up
//! through containers, packages and objects; [`Error::breadcrumb`] renders the
//! whole chain as `outer > inner > cause`.

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    /// Malformed bytes: bad tag, read past a stopper, garbled sizes.
    StructuralCorruption,
    /// The data is valid but uses a dialect or method this crate can't read.
    UnsupportedDialect,
    /// A referenced package, object or file could not be located.
    MissingResource,
    /// Missing or invalid settings such as the AES key or a game tag.
    ConfigurationError,
    /// Operating system I/O failure.
    Io,
}

/// Errors from package ingestion
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Wrong package tag: 0x{tag:08x}")]
    BadTag { tag: u32 },

    #[error("Data too short: need {needed} bytes, got {actual}")]
    DataTooShort { needed: usize, actual: usize },

    #[error("Read of {size} bytes at offset {pos} crosses stopper at {stopper}")]
    Stopper { pos: u64, size: usize, stopper: u64 },

    #[error("Read of {size} bytes at offset {pos} past end of stream ({len} bytes)")]
    Eof { pos: u64, size: usize, len: u64 },

    #[error("Corrupt data at offset {offset}: {message}")]
    Corrupt { offset: u64, message: String },

    #[error("Decompression size mismatch: expected {expected}, got {actual}")]
    DecompressionSize { expected: usize, actual: usize },

    #[error("Corrupt {method} block: {message}")]
    CorruptBlock {
        method: &'static str,
        message: String,
    },

    #[error("Unsupported compression method: {0}")]
    UnsupportedMethod(String),

    #[error("Unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },

    #[error("Property {property}: expected {expected}, got {actual}")]
    TypeMismatch {
        property: String,
        expected: String,
        actual: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("AES key required but not provided")]
    MissingAesKey,

    #[error("Invalid data size {0}: must be multiple of 16")]
    InvalidSize(usize),

    #[error("Invalid AES key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Oodle decompression error: {0}")]
    Oodle(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        Error::Corrupt {
            offset,
            message: message.into(),
        }
    }

    pub fn unsupported(what: &'static str, value: impl ToString) -> Self {
        Error::Unsupported {
            what,
            value: value.to_string(),
        }
    }

    /// Classify this error, looking through any breadcrumbs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::BadTag { .. }
            | Error::DataTooShort { .. }
            | Error::Stopper { .. }
            | Error::Eof { .. }
            | Error::Corrupt { .. }
            | Error::DecompressionSize { .. }
            | Error::CorruptBlock { .. }
            | Error::TypeMismatch { .. }
            | Error::InvalidSize(_)
            | Error::Oodle(_) => ErrorKind::StructuralCorruption,
            Error::UnsupportedMethod(_) | Error::Unsupported { .. } => {
                ErrorKind::UnsupportedDialect
            }
            Error::NotFound(_) => ErrorKind::MissingResource,
            Error::MissingAesKey | Error::InvalidKey(_) | Error::Config(_) => {
                ErrorKind::ConfigurationError
            }
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// The innermost error, with all breadcrumbs removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Render the breadcrumb chain, e.g. `Startup.upk > export 12 > Wrong package tag`.
    pub fn breadcrumb(&self) -> String {
        let mut parts = Vec::new();
        let mut current = self;
        while let Error::Context { context, source } = current {
            parts.push(context.clone());
            current = source;
        }
        parts.push(current.to_string());
        parts.join(" > ")
    }

    /// Wrap in one more breadcrumb.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Attach breadcrumbs to fallible results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Context {
            context: context.into(),
            source: Box::new(source),
        })
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| Error::Context {
            context: f().into(),
            source: Box::new(source),
        })
    }
}
