//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter          | Implements          | Connects to                |
//! |------------------|---------------------|----------------------------|
//! | `console`        | (driving)           | stdin command lines        |
//! | `hardware`       | RelayPort           | sysfs / simulated GPIO     |
//! |                  | AudioPort           | external player process    |
//! | `log_sink`       | EventSink           | log output                 |
//! | `settings_store` | ConfigPort          | JSON settings file         |
//! | `time`           | ClockPort           | monotonic system clock     |

pub mod console;
pub mod hardware;
pub mod log_sink;
pub mod settings_store;
pub mod time;
