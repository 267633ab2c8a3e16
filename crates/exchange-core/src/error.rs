use thiserror::Error;

/// Errors surfaced by the exchange client
///
/// The enum is `Clone` because the first transport failure is latched and
/// re-surfaced to every subsequent caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// A producer endpoint failed permanently after exhausting its retry budget
    #[error("Transport error from {location}: {cause}")]
    Transport { location: String, cause: String },

    /// New locations may not be registered after the location set is sealed
    #[error("No more locations already set")]
    LocationsSealed,

    /// An internal ordering or buffering invariant was broken
    #[error("State violation: {0}")]
    StateViolation(String),
}

impl ExchangeError {
    /// Build a transport error for the given endpoint
    pub fn transport(location: impl Into<String>, cause: impl Into<String>) -> Self {
        ExchangeError::Transport {
            location: location.into(),
            cause: cause.into(),
        }
    }
}

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;
