//! Connection-provider boundary for swarmrpc.
//!
//! The RPC core rides on an externally supplied stream transport. This crate
//! defines that boundary — peer identities, raw streams, and the
//! [`Connector`] trait — plus [`MemNet`], an in-process provider wired over
//! socket pairs for tests and demos.

pub mod connector;
pub mod error;
pub mod memnet;
pub mod peer;
pub mod stream;

pub use connector::{Connector, InboundSink};
pub use error::{NetError, Result};
pub use memnet::{MemNet, MemNode};
pub use peer::PeerId;
pub use stream::NetStream;
