//! In-process network of peers over socket pairs.
//!
//! `MemNet` plays the connection-provider role for tests and demos. Every
//! joined node is a [`Connector`]; logical connections are established with
//! [`MemNode::dial`] and each negotiated stream is one end of a
//! `UnixStream` pair.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::connector::{Connector, InboundSink};
use crate::error::{NetError, Result};
use crate::peer::PeerId;
use crate::stream::NetStream;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Board {
    nodes: Mutex<HashMap<PeerId, Weak<MemNode>>>,
}

/// An in-process switchboard of peers.
pub struct MemNet {
    board: Arc<Board>,
}

impl MemNet {
    pub fn new() -> Self {
        Self {
            board: Arc::new(Board::default()),
        }
    }

    /// Add a node to the network under the given peer id.
    pub fn join(&self, id: impl Into<PeerId>) -> Arc<MemNode> {
        let id = id.into();
        let node = Arc::new(MemNode {
            id: id.clone(),
            board: Arc::clone(&self.board),
            sinks: Mutex::new(HashMap::new()),
            links: Mutex::new(HashSet::new()),
            opened: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
        });
        lock(&self.board.nodes).insert(id, Arc::downgrade(&node));
        node
    }
}

impl Default for MemNet {
    fn default() -> Self {
        Self::new()
    }
}

/// One peer on a [`MemNet`].
pub struct MemNode {
    id: PeerId,
    board: Arc<Board>,
    sinks: Mutex<HashMap<String, InboundSink>>,
    links: Mutex<HashSet<PeerId>>,
    /// Outbound streams opened so far, per remote peer.
    opened: Mutex<HashMap<PeerId, u64>>,
    /// Clones of the streams between this node and each remote peer, kept
    /// so [`MemNode::sever`] can shut them down.
    live: Mutex<HashMap<PeerId, Vec<NetStream>>>,
}

impl MemNode {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Establish a logical connection to `peer` (both directions).
    pub fn dial(&self, peer: &PeerId) -> Result<()> {
        let target = self
            .lookup(peer)
            .ok_or_else(|| NetError::NotConnected(peer.clone()))?;
        lock(&self.links).insert(peer.clone());
        lock(&target.links).insert(self.id.clone());
        debug!(from = %self.id, to = %peer, "dialed");
        Ok(())
    }

    /// Number of outbound streams this node has opened to `peer` so far.
    ///
    /// Monotonic; useful for asserting stream reuse.
    pub fn streams_opened(&self, peer: &PeerId) -> u64 {
        lock(&self.opened).get(peer).copied().unwrap_or(0)
    }

    /// Shut down every stream between this node and `peer`.
    ///
    /// The logical connection stays up, so the next stream open succeeds.
    pub fn sever(&self, peer: &PeerId) {
        for stream in lock(&self.live).remove(peer).unwrap_or_default() {
            let _ = stream.shutdown();
        }
        if let Some(target) = self.lookup(peer) {
            for stream in lock(&target.live).remove(&self.id).unwrap_or_default() {
                let _ = stream.shutdown();
            }
        }
        debug!(from = %self.id, to = %peer, "severed");
    }

    fn lookup(&self, peer: &PeerId) -> Option<Arc<MemNode>> {
        lock(&self.board.nodes).get(peer)?.upgrade()
    }
}

impl Connector for MemNode {
    fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<NetStream> {
        if !lock(&self.links).contains(peer) {
            return Err(NetError::NotConnected(peer.clone()));
        }
        let target = self
            .lookup(peer)
            .ok_or_else(|| NetError::NotConnected(peer.clone()))?;
        let sink = lock(&target.sinks)
            .get(protocol)
            .cloned()
            .ok_or_else(|| NetError::ProtocolRefused {
                peer: peer.clone(),
                protocol: protocol.to_string(),
            })?;

        let (local, remote) = std::os::unix::net::UnixStream::pair()?;
        let local = NetStream::from_unix(local);
        let remote = NetStream::from_unix(remote);

        lock(&self.live)
            .entry(peer.clone())
            .or_default()
            .push(local.try_clone()?);
        lock(&target.live)
            .entry(self.id.clone())
            .or_default()
            .push(remote.try_clone()?);
        *lock(&self.opened).entry(peer.clone()).or_insert(0) += 1;

        debug!(from = %self.id, to = %peer, protocol, "stream opened");
        sink(remote, self.id.clone());
        Ok(local)
    }

    fn register(&self, protocol: &str, sink: InboundSink) {
        lock(&self.sinks).insert(protocol.to_string(), sink);
    }

    fn unregister(&self, protocol: &str) {
        lock(&self.sinks).remove(protocol);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::mpsc;

    use super::*;

    const PROTO: &str = "/test/1.0.0";

    #[test]
    fn open_stream_requires_dial() {
        let net = MemNet::new();
        let a = net.join("a");
        let _b = net.join("b");

        let err = a.open_stream(&PeerId::new("b"), PROTO).unwrap_err();
        assert!(matches!(err, NetError::NotConnected(_)));
    }

    #[test]
    fn open_stream_requires_registered_protocol() {
        let net = MemNet::new();
        let a = net.join("a");
        let _b = net.join("b");
        a.dial(&PeerId::new("b")).unwrap();

        let err = a.open_stream(&PeerId::new("b"), PROTO).unwrap_err();
        assert!(matches!(err, NetError::ProtocolRefused { .. }));
    }

    #[test]
    fn open_stream_delivers_to_sink() {
        let net = MemNet::new();
        let a = net.join("a");
        let b = net.join("b");
        a.dial(b.id()).unwrap();

        let (tx, rx) = mpsc::channel();
        b.register(
            PROTO,
            // sinks run on the opener's thread, so hand the stream off
            Arc::new(move |mut stream: NetStream, peer: PeerId| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    let mut buf = [0u8; 5];
                    stream.read_exact(&mut buf).unwrap();
                    tx.send((buf, peer)).unwrap();
                });
            }),
        );

        let mut stream = a.open_stream(b.id(), PROTO).unwrap();
        stream.write_all(b"hello").unwrap();

        let (buf, peer) = rx.recv().unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(peer, PeerId::new("a"));
    }

    #[test]
    fn counts_opened_streams() {
        let net = MemNet::new();
        let a = net.join("a");
        let b = net.join("b");
        a.dial(b.id()).unwrap();
        b.register(PROTO, Arc::new(|_: NetStream, _: PeerId| {}));

        assert_eq!(a.streams_opened(b.id()), 0);
        let _s1 = a.open_stream(b.id(), PROTO).unwrap();
        let _s2 = a.open_stream(b.id(), PROTO).unwrap();
        assert_eq!(a.streams_opened(b.id()), 2);
        assert_eq!(b.streams_opened(a.id()), 0);
    }

    #[test]
    fn sever_closes_streams_but_not_link() {
        let net = MemNet::new();
        let a = net.join("a");
        let b = net.join("b");
        a.dial(b.id()).unwrap();
        b.register(PROTO, Arc::new(|_: NetStream, _: PeerId| {}));

        let mut stream = a.open_stream(b.id(), PROTO).unwrap();
        a.sever(b.id());

        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        // still connected: a fresh stream opens fine
        assert!(a.open_stream(b.id(), PROTO).is_ok());
    }

    #[test]
    fn unregister_refuses_new_streams() {
        let net = MemNet::new();
        let a = net.join("a");
        let b = net.join("b");
        a.dial(b.id()).unwrap();
        b.register(PROTO, Arc::new(|_: NetStream, _: PeerId| {}));
        b.unregister(PROTO);

        let err = a.open_stream(b.id(), PROTO).unwrap_err();
        assert!(matches!(err, NetError::ProtocolRefused { .. }));
    }
}
