//! Storage abstraction shared by the broker, the token service and the
//! tenant directory.
//!
//! Every entry belongs to exactly one subdomain; isolation between tenants
//! is a property of the key layout, not of the backend.

pub mod error;
pub mod key;
pub mod store;

pub use error::StateError;
pub use key::{KeyKind, StateKey};
pub use store::StateStore;
