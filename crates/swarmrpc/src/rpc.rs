use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use swarmrpc_mux::{ListenerId, Messenger, MessengerConfig};
use swarmrpc_net::{Connector, PeerId};
use swarmrpc_wire::{Envelope, Request, Response, RpcError};
use tracing::{debug, trace};

use crate::error::MethodError;

/// Default protocol identifier for stream negotiation.
pub const DEFAULT_PROTOCOL: &str = "/libp2p-rpc/0.0.1";

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Configuration for an [`Rpc`] instance.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Protocol identifier used for stream negotiation.
    pub protocol: String,
    /// Per-call timeout. `None` disables it: a call then blocks until a
    /// response arrives or the engine stops.
    pub timeout: Option<Duration>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// Outcome of a method handler.
pub type MethodResult = std::result::Result<Option<Bytes>, MethodError>;

/// A named method callable by remote peers.
///
/// Implemented for any matching `Fn`, so closures register directly.
pub trait Method: Send + Sync {
    fn call(&self, params: Option<Bytes>, sender: &PeerId) -> MethodResult;
}

impl<F> Method for F
where
    F: Fn(Option<Bytes>, &PeerId) -> MethodResult + Send + Sync,
{
    fn call(&self, params: Option<Bytes>, sender: &PeerId) -> MethodResult {
        self(params, sender)
    }
}

type CallOutcome = std::result::Result<Option<Bytes>, RpcError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Engine {
    methods: Mutex<HashMap<String, Arc<dyn Method>>>,
    /// One entry per outstanding `request()`. Removal under the mutex is
    /// the complete-once gate: whichever path removes an entry delivers its
    /// outcome, and the losing paths find it absent.
    pending: Mutex<HashMap<u32, SyncSender<CallOutcome>>>,
    next_id: AtomicU32,
}

/// The RPC correlation engine.
///
/// Registers named methods, invokes methods on remote peers with a
/// correlated reply ([`Rpc::request`]) or without one ([`Rpc::notify`]),
/// and routes inbound frames to a local method or a pending call.
///
/// Every call through [`Rpc::request`] resolves exactly once, with either
/// the method's result or a typed [`RpcError`].
pub struct Rpc {
    config: RpcConfig,
    messenger: Arc<Messenger>,
    engine: Arc<Engine>,
    listener: Mutex<Option<ListenerId>>,
    started: AtomicBool,
}

impl Rpc {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, RpcConfig::default())
    }

    pub fn with_config(connector: Arc<dyn Connector>, config: RpcConfig) -> Self {
        let messenger = Arc::new(Messenger::with_config(
            connector,
            MessengerConfig {
                protocol: config.protocol.clone(),
                ..MessengerConfig::default()
            },
        ));
        Self {
            config,
            messenger,
            engine: Arc::new(Engine {
                methods: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(0),
            }),
            listener: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Register with the connection provider and begin routing inbound
    /// frames. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.messenger.start();
        let engine = Arc::clone(&self.engine);
        let messenger = Arc::clone(&self.messenger);
        let id = self.messenger.handle(move |frame: Bytes, peer: &PeerId| {
            let envelope = Envelope::decode(&frame)?;
            engine.route(&messenger, envelope, peer)?;
            Ok(())
        });
        *lock(&self.listener) = Some(id);
        debug!("started");
    }

    /// Tear the engine down. Idempotent.
    ///
    /// Every outstanding call is rejected with the stopped code and the
    /// method registry is cleared; methods must be re-added after a future
    /// [`Rpc::start`].
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(id) = lock(&self.listener).take() {
            self.messenger.unhandle(id);
        }
        self.messenger.stop();

        // Reject the open calls.
        let pending: Vec<SyncSender<CallOutcome>> = lock(&self.engine.pending)
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        for tx in pending {
            let _ = tx.send(Err(RpcError::stopped()));
        }
        lock(&self.engine.methods).clear();
        debug!("stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Register a method. Last registration under a name wins.
    pub fn add_method(&self, name: impl Into<String>, method: impl Method + 'static) {
        lock(&self.engine.methods).insert(name.into(), Arc::new(method));
    }

    /// Deregister a method. Returns whether it was registered.
    pub fn remove_method(&self, name: &str) -> bool {
        lock(&self.engine.methods).remove(name).is_some()
    }

    pub fn has_method(&self, name: &str) -> bool {
        lock(&self.engine.methods).contains_key(name)
    }

    /// Call `name` on `peer` and block until the correlated response
    /// arrives, the timeout fires, or [`Rpc::stop`] is called.
    pub fn request(
        &self,
        peer: &PeerId,
        name: &str,
        params: Option<Bytes>,
    ) -> std::result::Result<Option<Bytes>, RpcError> {
        let id = self.engine.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut pending = lock(&self.engine.pending);
            match pending.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
                // the id space wrapped into a still-outstanding call
                Entry::Occupied(_) => {
                    return Err(RpcError::send_failure("message id space exhausted"))
                }
            }
        }

        let frame = Envelope::request(name, id, params).encode();
        if let Err(err) = self.messenger.send(peer, frame) {
            lock(&self.engine.pending).remove(&id);
            debug!(%peer, %err, "failed to send request");
            return Err(RpcError::send_failure(err));
        }
        trace!(%peer, name, id, "request sent");

        match self.config.timeout {
            None => rx.recv().unwrap_or_else(|_| Err(RpcError::stopped())),
            Some(window) => match rx.recv_timeout(window) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    // If the entry is already gone, a resolution won the
                    // race and its outcome is in flight; collect it.
                    if lock(&self.engine.pending).remove(&id).is_some() {
                        Err(RpcError::timed_out())
                    } else {
                        rx.recv().unwrap_or_else(|_| Err(RpcError::stopped()))
                    }
                }
                Err(RecvTimeoutError::Disconnected) => Err(RpcError::stopped()),
            },
        }
    }

    /// Fire-and-forget call: no message id, no pending entry, no reply.
    ///
    /// Send failures are deliberately swallowed.
    pub fn notify(&self, peer: &PeerId, name: &str, params: Option<Bytes>) {
        let frame = Envelope::notification(name, params).encode();
        if let Err(err) = self.messenger.send(peer, frame) {
            debug!(%peer, %err, "failed to send notification");
            return;
        }
        trace!(%peer, name, "notification sent");
    }
}

impl Engine {
    /// Handle one decoded inbound frame: invoke a local method or resolve a
    /// pending call. Runs on the stream's decode loop, so frames from one
    /// peer stream are handled strictly in order.
    fn route(
        &self,
        messenger: &Messenger,
        envelope: Envelope,
        peer: &PeerId,
    ) -> swarmrpc_mux::Result<()> {
        if let Some(request) = envelope.request {
            return self.route_request(messenger, request, peer);
        }
        if let Some(response) = envelope.response {
            self.route_response(response);
        }
        Ok(())
    }

    fn route_request(
        &self,
        messenger: &Messenger,
        request: Request,
        peer: &PeerId,
    ) -> swarmrpc_mux::Result<()> {
        let method = lock(&self.methods).get(&request.name).cloned();
        let Some(method) = method else {
            // an unknown notification is dropped, not answered
            let Some(id) = request.id else {
                return Ok(());
            };
            return messenger.send(peer, Envelope::method_not_found(id).encode());
        };

        trace!(%peer, name = %request.name, "method called");
        let invoked = panic::catch_unwind(AssertUnwindSafe(|| method.call(request.params, peer)));
        let outcome: CallOutcome = match invoked {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(MethodError::Rpc(error))) => Err(error),
            Ok(Err(MethodError::Other(error))) => Err(RpcError::new(0, error.to_string())),
            Err(payload) => Err(RpcError::new(
                RpcError::UNKNOWN,
                panic_message(payload.as_ref()),
            )),
        };

        // a notification gets no reply, success or failure
        let Some(id) = request.id else {
            if let Err(error) = &outcome {
                debug!(name = %request.name, %error, "notification method failed");
            }
            return Ok(());
        };
        let reply = match outcome {
            Ok(result) => Envelope::response(id, result),
            Err(error) => {
                debug!(name = %request.name, %error, "method failed");
                Envelope::error_response(id, error)
            }
        };
        messenger.send(peer, reply.encode())
    }

    fn route_response(&self, response: Response) {
        let resolver = lock(&self.pending).remove(&response.id);
        // absent: already resolved, already timed out, or never issued
        let Some(tx) = resolver else {
            trace!(id = response.id, "uncorrelated response dropped");
            return;
        };
        let outcome = match response.error {
            None => Ok(response.result),
            Some(error) => Err(error),
        };
        let _ = tx.send(outcome);
    }
}

/// Best-effort string rendering of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown error".to_string()
    }
}
