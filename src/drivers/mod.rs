//! Actuator drivers and indicator helpers.

pub mod audio;
pub mod flash;
pub mod relay;
pub mod sysfs_gpio;
