//! Peer-to-peer RPC over an externally supplied stream transport.
//!
//! swarmrpc lets a node register named methods, invoke methods on remote
//! peers and await the correlated reply (or fire and forget), with many
//! requests and responses interleaved over one reused stream per peer.
//!
//! # Crate Structure
//!
//! - [`net`] — Connection-provider boundary and in-process test network
//! - [`wire`] — Envelope codec and length-prefixed stream framing
//! - [`mux`] — Per-peer stream multiplexer
//! - [`rpc`] — Method registry, request correlation and inbound routing

pub mod error;
pub mod rpc;

/// Re-export connection-provider types.
pub mod net {
    pub use swarmrpc_net::*;
}

/// Re-export wire types.
pub mod wire {
    pub use swarmrpc_wire::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use swarmrpc_mux::*;
}

pub use error::MethodError;
pub use rpc::{Method, MethodResult, Rpc, RpcConfig, DEFAULT_PROTOCOL};
pub use swarmrpc_net::{Connector, MemNet, MemNode, NetError, PeerId};
pub use swarmrpc_wire::RpcError;
