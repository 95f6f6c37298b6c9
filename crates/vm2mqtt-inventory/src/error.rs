//! Error types for inventory providers.

use thiserror::Error;

/// A result type using `InventoryError`.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Errors that can occur while talking to a management backend.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The backend could not be reached or answered with an error status.
    ///
    /// Callers treat this as "no data this cycle", not as a hard stop.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend answered, but the body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The unit does not carry the information this provider needs to act on it.
    #[error("unsupported unit: {0}")]
    UnsupportedUnit(String),

    /// The provider could not be constructed from its configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl InventoryError {
    /// Returns true if the next poll cycle might succeed where this one failed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::InvalidResponse(_))
    }
}
