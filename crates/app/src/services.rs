//! Bridge services: the use-cases the bridge runs concurrently.
//!
//! Each service accepts port trait implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete adapters.

pub mod command_handler;
pub mod discovery_engine;
pub mod polling_loop;
pub mod presence;
pub mod state_refresher;
