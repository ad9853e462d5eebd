//! Error types for the relaycat core library.

use thiserror::Error;

/// Result type alias using relaycat `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for relay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The address text matches none of the known endpoint forms.
    #[error("address type not supported: {0}")]
    UnrecognizedAddress(String),

    /// The address form is known but its parameters are malformed.
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Both addresses asked to accept connections with `fork`.
    #[error("at most one address may use fork: {0} and {1}")]
    MultipleForkingListeners(String, String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opening an endpoint failed (connect, bind/listen/accept, file open).
    #[error("failed to open {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Read attempted on a reader that was already released.
    #[error("input was closed")]
    ReaderClosed,

    /// Write attempted on a writer that was already released.
    #[error("output was closed")]
    WriterClosed,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O failure raised while opening `address`.
    pub(crate) fn resolve(address: impl ToString, source: std::io::Error) -> Self {
        Self::Resolve {
            address: address.to_string(),
            source,
        }
    }

    /// Whether this error was raised before any I/O took place.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedAddress(_)
                | Self::InvalidAddress { .. }
                | Self::MultipleForkingListeners(..)
                | Self::Config(_)
        )
    }
}
