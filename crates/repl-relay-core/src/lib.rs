//! Core abstractions for relaying code submissions to an interactive session.
//!
//! This crate provides the fundamental building blocks:
//! - `FrontEnd` / `SessionRegistry` - Host-side session seams
//! - `HostEvent` - Lifecycle notifications delivered by the host
//! - `DispatchEvent` + `EventStore` - Batch progress with history replay
//! - `RelayConfig` - Relay configuration

pub mod config;
pub mod event;
pub mod event_store;
pub mod traits;

pub use config::{ConfigError, RelayConfig};
pub use event::DispatchEvent;
pub use event_store::EventStore;
pub use traits::{
    FrontEnd, FrontEndId, FrontEndRef, HostEvent, InputError, RegistryError, SessionRegistry,
    SlotToken,
};
