//! Control engines: pump hysteresis and alarm classification.
//!
//! Both are synchronous and I/O-free.  They run only on the application
//! queue, so neither needs locking.

pub mod alarm;
pub mod pump;
