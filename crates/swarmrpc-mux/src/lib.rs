//! Per-peer stream multiplexer for swarmrpc.
//!
//! One outbound write queue and one inbound decode loop per stream; at most
//! one live queue per peer, reused across calls instead of opening a stream
//! per call.

pub mod error;
pub mod messenger;

pub use error::{MuxError, Result};
pub use messenger::{BoxError, ListenerId, Messenger, MessengerConfig};
