//! Cross-thread message queue into the application core.
//!
//! Messages are produced by:
//! - polling threads (readings, disconnects)
//! - the supervisor / watchdog (connects, disables)
//! - the console (user commands)
//!
//! They are consumed by the application loop, which processes them one at
//! a time in FIFO order together with its timer queue.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Pollers     │────▶│              │     │              │
//! │ Watchdog    │────▶│  CoreQueue   │────▶│  AppService  │
//! │ Console     │────▶│  (crossbeam) │     │  (consumer)  │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

use crossbeam::channel::{self, Receiver, Sender};
use log::warn;

use crate::app::commands::AppCommand;
use crate::codec::Reading;
use crate::config::EndpointId;

/// Everything that can arrive on the application queue.
#[derive(Debug, Clone)]
pub enum CoreMsg {
    /// An endpoint passed discovery and its poller is running.
    Connected {
        endpoint: EndpointId,
        transport: String,
        firmware: Option<String>,
    },
    /// An endpoint's transport failed.
    Disconnected { endpoint: EndpointId },
    /// An endpoint exhausted its reconnect attempts.
    Disabled { endpoint: EndpointId, attempts: u32 },
    /// One poll cycle's replies for an endpoint.
    Readings {
        endpoint: EndpointId,
        readings: Vec<Reading>,
    },
    /// A user or console command.
    Command(AppCommand),
    /// Stop the application loop.
    Shutdown,
}

/// Producer handle; cheap to clone into every thread.
#[derive(Debug, Clone)]
pub struct CoreSender {
    tx: Sender<CoreMsg>,
}

impl CoreSender {
    /// Queue a message.  Returns `false` once the consumer is gone.
    pub fn send(&self, msg: CoreMsg) -> bool {
        match self.tx.send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("CoreQueue: consumer gone, dropped {:?}", e.0);
                false
            }
        }
    }
}

/// Create the queue.  Unbounded: producers are few and the consumer never
/// blocks on I/O.
pub fn core_queue() -> (CoreSender, Receiver<CoreMsg>) {
    let (tx, rx) = channel::unbounded();
    (CoreSender { tx }, rx)
}
