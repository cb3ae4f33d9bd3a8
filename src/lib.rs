//! Aquamon coordinator library.
//!
//! Exposes the core for the binary, the integration tests and the fuzz
//! targets.  Nothing here touches hardware except through the adapters.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod codec;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod events;
pub mod link;
pub mod scheduler;
pub mod supervisor;
pub mod update;
