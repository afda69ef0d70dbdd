use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use bytes::Bytes;
use swarmrpc_net::{Connector, NetStream, PeerId};
use swarmrpc_wire::{FrameConfig, FrameReader, FrameWriter, WireError, DEFAULT_MAX_PAYLOAD};
use tracing::{debug, trace};

use crate::error::{MuxError, Result};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type ListenerFn = dyn Fn(Bytes, &PeerId) -> std::result::Result<(), BoxError> + Send + Sync;

/// Handle returned by [`Messenger::handle`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Configuration for a [`Messenger`].
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Protocol identifier negotiated with the connection provider.
    pub protocol: String,
    /// Maximum frame payload accepted or sent.
    pub max_frame_size: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            protocol: "/message-handler/0.0.1".to_string(),
            max_frame_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Queue {
    tx: mpsc::Sender<Bytes>,
    /// Identifies the stream this queue is bound to, so only that stream's
    /// loops tear it down.
    token: u64,
}

struct Shared {
    writers: Mutex<HashMap<PeerId, Queue>>,
    /// Per-peer establishment locks: two concurrent first-sends to the same
    /// peer must not open two streams.
    opening: Mutex<HashMap<PeerId, Arc<Mutex<()>>>>,
    listeners: Mutex<Vec<(ListenerId, Arc<ListenerFn>)>>,
    /// Clones of every adopted stream, so `stop()` can shut them down.
    streams: Mutex<HashMap<u64, NetStream>>,
    next_listener: AtomicU64,
    next_token: AtomicU64,
    max_frame_size: usize,
}

/// Maps each peer to at most one live outbound queue and drives one decode
/// loop per inbound stream.
///
/// Frames queued for a peer are written FIFO by a single writer thread
/// bound to that peer's stream; frames arriving on a stream are handed to
/// every registered listener, one frame fully processed before the next is
/// read.
pub struct Messenger {
    connector: Arc<dyn Connector>,
    config: MessengerConfig,
    shared: Arc<Shared>,
    started: AtomicBool,
}

impl Messenger {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, MessengerConfig::default())
    }

    pub fn with_config(connector: Arc<dyn Connector>, config: MessengerConfig) -> Self {
        let shared = Arc::new(Shared {
            writers: Mutex::new(HashMap::new()),
            opening: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            streams: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            next_token: AtomicU64::new(0),
            max_frame_size: config.max_frame_size,
        });
        Self {
            connector,
            config,
            shared,
            started: AtomicBool::new(false),
        }
    }

    /// Register with the connection provider for inbound streams.
    /// Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.connector.register(
            &self.config.protocol,
            Arc::new(move |stream: NetStream, peer: PeerId| {
                if let Err(err) = shared.adopt(stream, peer.clone()) {
                    debug!(%peer, %err, "failed to adopt inbound stream");
                }
            }),
        );
        debug!(protocol = %self.config.protocol, "messenger started");
    }

    /// Deregister from the provider and tear down every queue and stream.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.connector.unregister(&self.config.protocol);
        lock(&self.shared.writers).clear();
        let streams: Vec<NetStream> = lock(&self.shared.streams)
            .drain()
            .map(|(_, stream)| stream)
            .collect();
        for stream in &streams {
            let _ = stream.shutdown();
        }
        debug!("messenger stopped");
    }

    /// Register a listener invoked with every decoded inbound frame on any
    /// stream.
    ///
    /// A listener returning an error ends that stream's decode loop
    /// silently.
    pub fn handle<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Bytes, &PeerId) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Deregister a listener.
    pub fn unhandle(&self, id: ListenerId) {
        lock(&self.shared.listeners).retain(|(listener_id, _)| *listener_id != id);
    }

    /// Queue a frame for `peer`, establishing a stream if none is live.
    ///
    /// Establishment is serialized per peer, so concurrent first-sends
    /// cannot open two streams to the same destination.
    pub fn send(&self, peer: &PeerId, frame: Bytes) -> Result<()> {
        if frame.len() > self.shared.max_frame_size {
            return Err(WireError::PayloadTooLarge {
                size: frame.len(),
                max: self.shared.max_frame_size,
            }
            .into());
        }

        let mut frame = frame;
        if let Some(tx) = self.shared.queue_for(peer) {
            match tx.send(frame) {
                Ok(()) => return Ok(()),
                // stale queue: its writer loop already exited
                Err(mpsc::SendError(returned)) => frame = returned,
            }
        }

        let gate = {
            let mut opening = lock(&self.shared.opening);
            Arc::clone(opening.entry(peer.clone()).or_default())
        };
        let _held = gate.lock().unwrap_or_else(PoisonError::into_inner);

        // someone else may have established while we waited
        if let Some(tx) = self.shared.queue_for(peer) {
            match tx.send(frame) {
                Ok(()) => return Ok(()),
                Err(mpsc::SendError(returned)) => frame = returned,
            }
        }

        let stream = self.connector.open_stream(peer, &self.config.protocol)?;
        let tx = self.shared.adopt(stream, peer.clone())?;
        tx.send(frame).map_err(|_| MuxError::QueueClosed)?;
        Ok(())
    }
}

impl Shared {
    fn queue_for(&self, peer: &PeerId) -> Option<mpsc::Sender<Bytes>> {
        lock(&self.writers).get(peer).map(|queue| queue.tx.clone())
    }

    /// Bind loops to a stream: always a decode loop, and a writer loop with
    /// a fresh queue unless the peer already has one.
    fn adopt(self: &Arc<Self>, stream: NetStream, peer: PeerId) -> Result<mpsc::Sender<Bytes>> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let read_half = stream.try_clone().map_err(MuxError::Net)?;
        lock(&self.streams).insert(token, stream.try_clone().map_err(MuxError::Net)?);

        let tx = {
            let mut writers = lock(&self.writers);
            if let Some(queue) = writers.get(&peer) {
                // the peer already has a live queue on another stream;
                // this one is adopted read-only
                queue.tx.clone()
            } else {
                let (tx, rx) = mpsc::channel::<Bytes>();
                writers.insert(
                    peer.clone(),
                    Queue {
                        tx: tx.clone(),
                        token,
                    },
                );
                let shared = Arc::clone(self);
                let write_peer = peer.clone();
                thread::spawn(move || shared.write_loop(stream, rx, write_peer, token));
                tx
            }
        };

        let shared = Arc::clone(self);
        thread::spawn(move || shared.read_loop(read_half, peer, token));
        Ok(tx)
    }

    fn write_loop(
        self: Arc<Self>,
        stream: NetStream,
        rx: mpsc::Receiver<Bytes>,
        peer: PeerId,
        token: u64,
    ) {
        let mut writer = FrameWriter::with_config(
            stream,
            FrameConfig {
                max_payload_size: self.max_frame_size,
            },
        );
        while let Ok(frame) = rx.recv() {
            if let Err(err) = writer.send(&frame) {
                debug!(%peer, %err, "outbound write failed");
                break;
            }
            trace!(%peer, len = frame.len(), "frame written");
        }
        self.drop_queue(&peer, token);
    }

    fn read_loop(self: Arc<Self>, stream: NetStream, peer: PeerId, token: u64) {
        let mut reader = FrameReader::with_config(
            stream,
            FrameConfig {
                max_payload_size: self.max_frame_size,
            },
        );
        'stream: loop {
            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(WireError::ConnectionClosed) => {
                    trace!(%peer, "inbound stream closed");
                    break;
                }
                Err(err) => {
                    debug!(%peer, %err, "inbound stream failed");
                    break;
                }
            };

            // Every listener sees every frame, and the frame is fully
            // handled before the next one is read; this is what serializes
            // per-stream message handling.
            let listeners: Vec<Arc<ListenerFn>> = lock(&self.listeners)
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in listeners {
                if let Err(err) = listener(frame.clone(), &peer) {
                    debug!(%peer, %err, "listener failed, ending stream loop");
                    break 'stream;
                }
            }
        }
        self.drop_queue(&peer, token);
    }

    /// Remove the peer's queue if it is bound to this stream, and shut the
    /// stream down. Future sends to the peer re-establish.
    fn drop_queue(&self, peer: &PeerId, token: u64) {
        let mut writers = lock(&self.writers);
        if writers.get(peer).is_some_and(|queue| queue.token == token) {
            writers.remove(peer);
            trace!(%peer, "outbound queue removed");
        }
        drop(writers);
        if let Some(stream) = lock(&self.streams).remove(&token) {
            let _ = stream.shutdown();
        }
    }
}
