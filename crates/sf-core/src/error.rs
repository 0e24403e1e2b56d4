//! Unified error type for sf-core.
//!
//! Only configuration loading can fail here; remuxing itself never returns
//! a hard error (see `sf_remux::RemuxError`).

/// Errors raised while loading or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration document could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Convenience constructor for [`Error::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
