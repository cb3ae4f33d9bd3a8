//! Application core: control logic with no direct I/O.
//!
//! This module contains the business rules for the coordinator: pump
//! hysteresis, alarm signalling and config persistence policy.  All
//! interaction with hardware happens through **port traits** defined in
//! [`ports`], keeping this layer testable without relays or a sound card.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
