//! # kasa-bridge-app
//!
//! Application layer: bridge use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `DeviceProtocol`: discover devices, fetch state, send commands
//!   - `MessagePublisher` / `MessageSubscriber`: the message bus
//! - Own the **device registry**, the single source of truth for what is
//!   reachable
//! - Run the use-cases:
//!   - `DiscoveryEngine`: execute discovery jobs and merge sightings
//!   - `PollingLoop`: refresh and publish every device periodically
//!   - `CommandHandler`: apply commands and verify them by observation
//!   - `Presence`: bridge status and heartbeat
//! - Provide **in-process infrastructure** (message bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `kasa-bridge-domain` only (plus `tokio` and `futures` for
//! concurrency). Never imports adapter crates. Adapters depend on *this*
//! crate, not the reverse.

pub mod bridge;
pub mod in_process_bus;
pub mod ports;
pub mod registry;
pub mod services;
pub mod settings;

#[cfg(test)]
mod testing;
