//! Core domain model for the Eclosion IFTTT shim.
//!
//! Everything here is independent of the HTTP layer and the storage
//! substrate: tenant and slug identifiers, the entities that live inside a
//! tenant's broker, the static catalog describing every supported trigger,
//! action, query and field-option source, and the pure event filters the
//! trigger handlers apply.

pub mod catalog;
pub mod entities;
pub mod filters;
pub mod types;

pub use catalog::{
    ActionSpec, FieldOptionSource, FieldRule, QueryBacking, QuerySpec, TriggerSpec,
};
pub use entities::{
    ActionHistoryEntry, CachedFieldOptions, FieldOption, IftttUser, QueuedAction, TriggerEvent,
    TriggerSubscription,
};
pub use types::{
    ActionSlug, EventId, FieldSlug, QuerySlug, Subdomain, TriggerIdentity, TriggerSlug,
};
