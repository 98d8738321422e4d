//! HTTP edge for the Eclosion IFTTT shim.
//!
//! Speaks the IFTTT Service API on one side and the tenant's HTTPS tunnel
//! on the other, with the per-tenant broker in between. The binary in
//! `main.rs` wires a state store, the broker registry and this crate's
//! router together.

pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod realtime;
pub mod tunnel;

pub use config::EclosionConfig;
pub use error::ServerError;
