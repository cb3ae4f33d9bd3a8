//! Endpoint links: transports and the per-endpoint session that serialises
//! request/response pairs over them.

pub mod serial;
pub mod session;
pub mod tcp;
pub mod transport;

pub use session::{Exchange, LinkSession};
pub use transport::Transport;
