use thiserror::Error;

/// Errors surfaced by a [`StateStore`](crate::store::StateStore) backend.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backend rejected or failed the operation.
    #[error("state backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("state serialization error: {0}")]
    Serialization(String),
}
