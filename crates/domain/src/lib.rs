//! # kasa-bridge-domain
//!
//! Pure domain model for the kasa bridge.
//!
//! ## Responsibilities
//! - Foundational types: device identity, error conventions, timestamps
//! - Define **capability classes** and the attribute schema each one exposes
//! - Define **devices** (registry records) and **descriptors** (raw sightings)
//! - Define **discovery jobs** (broadcast, host, network range)
//! - Provide the **mapper** between devices and bus topics/payloads
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod identity;
pub mod time;

pub mod attribute;
pub mod capability;
pub mod device;
pub mod discovery;
pub mod mapper;
