use std::sync::Arc;

use crate::error::Result;
use crate::peer::PeerId;
use crate::stream::NetStream;

/// Callback invoked with each inbound stream negotiated under a registered
/// protocol, together with the peer that opened it.
pub type InboundSink = Arc<dyn Fn(NetStream, PeerId) + Send + Sync>;

/// The boundary the RPC core consumes from its connection provider.
///
/// Implementations own connection establishment, peer identity and stream
/// negotiation. The core only opens streams on already-live connections and
/// registers for inbound ones.
pub trait Connector: Send + Sync {
    /// Open a new ordered, reliable, bidirectional stream to `peer` under
    /// `protocol`.
    ///
    /// Fails with [`NetError::NotConnected`](crate::NetError::NotConnected)
    /// if no live connection to `peer` exists.
    fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<NetStream>;

    /// Register `sink` for inbound streams negotiated under `protocol`.
    ///
    /// At most one sink per protocol; a second registration replaces the
    /// first. The sink may be invoked on the opener's thread and must hand
    /// the stream off without blocking.
    fn register(&self, protocol: &str, sink: InboundSink);

    /// Deregister the inbound sink for `protocol`.
    fn unregister(&self, protocol: &str);
}
