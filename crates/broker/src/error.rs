use thiserror::Error;

use eclosion_state::StateError;

/// Errors surfaced by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The underlying state store failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// A stored record could not be encoded or decoded.
    #[error("broker codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
