//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host with no serial
//! ports, GPIO lines or network required.

mod app_service_tests;
mod mock_hw;
mod supervisor_tests;
mod update_tests;
