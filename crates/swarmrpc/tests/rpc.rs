//! End-to-end tests over two in-process peers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use swarmrpc::{MemNet, MemNode, MethodError, MethodResult, PeerId, Rpc, RpcConfig, RpcError};

struct Fixture {
    _net: MemNet,
    local_node: Arc<MemNode>,
    remote_node: Arc<MemNode>,
    local: Arc<Rpc>,
    remote: Arc<Rpc>,
}

fn fixture_with(config: RpcConfig) -> Fixture {
    let net = MemNet::new();
    let local_node = net.join("local");
    let remote_node = net.join("remote");

    let local = Arc::new(Rpc::with_config(local_node.clone(), config.clone()));
    let remote = Arc::new(Rpc::with_config(remote_node.clone(), config));
    local.start();
    remote.start();
    local_node.dial(remote_node.id()).unwrap();

    Fixture {
        _net: net,
        local_node,
        remote_node,
        local,
        remote,
    }
}

fn fixture() -> Fixture {
    fixture_with(RpcConfig::default())
}

fn reply(bytes: &'static [u8]) -> impl Fn(Option<Bytes>, &PeerId) -> MethodResult + Send + Sync {
    move |_: Option<Bytes>, _: &PeerId| Ok(Some(Bytes::from_static(bytes)))
}

#[test]
fn calls_method_and_returns_result() {
    let fx = fixture();

    let seen: Arc<Mutex<Option<(Option<Bytes>, PeerId)>>> = Arc::default();
    let seen_in = Arc::clone(&seen);
    fx.remote.add_method(
        "test",
        move |params: Option<Bytes>, sender: &PeerId| -> MethodResult {
            *seen_in.lock().unwrap() = Some((params, sender.clone()));
            Ok(Some(Bytes::from_static(&[2, 3, 4])))
        },
    );

    let result = fx
        .local
        .request(
            fx.remote_node.id(),
            "test",
            Some(Bytes::from_static(&[1, 2, 3])),
        )
        .unwrap();
    assert_eq!(result, Some(Bytes::from_static(&[2, 3, 4])));

    let (params, sender) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(params, Some(Bytes::from_static(&[1, 2, 3])));
    assert_eq!(sender, PeerId::new("local"));
}

#[test]
fn absent_params_and_result_roundtrip() {
    let fx = fixture();

    let seen_params: Arc<Mutex<Option<Option<Bytes>>>> = Arc::default();
    let seen_in = Arc::clone(&seen_params);
    fx.remote.add_method(
        "void",
        move |params: Option<Bytes>, _: &PeerId| -> MethodResult {
            *seen_in.lock().unwrap() = Some(params);
            Ok(None)
        },
    );

    let result = fx.local.request(fx.remote_node.id(), "void", None).unwrap();
    assert_eq!(result, None);
    assert_eq!(seen_params.lock().unwrap().clone(), Some(None));
}

#[test]
fn notification_invokes_method_without_reply() {
    let fx = fixture();

    let (tx, rx) = mpsc::channel();
    fx.remote.add_method(
        "notice",
        move |params: Option<Bytes>, sender: &PeerId| -> MethodResult {
            tx.send((params, sender.clone())).unwrap();
            // a notification discards the return value
            Ok(Some(Bytes::from_static(b"ignored")))
        },
    );

    fx.local
        .notify(fx.remote_node.id(), "notice", Some(Bytes::from_static(&[1])));

    let (params, sender) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(params, Some(Bytes::from_static(&[1])));
    assert_eq!(sender, PeerId::new("local"));

    // the reply-less exchange leaves the stream healthy for real calls
    fx.remote.add_method("ping", reply(b"pong"));
    assert!(fx.local.request(fx.remote_node.id(), "ping", None).is_ok());
}

#[test]
fn notification_failure_produces_no_reply() {
    let fx = fixture();

    let (tx, rx) = mpsc::channel();
    fx.remote.add_method(
        "explode",
        move |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            tx.send(()).unwrap();
            Err(RpcError::new(5, "boom").into())
        },
    );

    fx.local.notify(fx.remote_node.id(), "explode", None);
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // no error frame came back to disturb the engine
    fx.remote.add_method("ping", reply(b"pong"));
    assert!(fx.local.request(fx.remote_node.id(), "ping", None).is_ok());
}

#[test]
fn unknown_method_rejects_request() {
    let fx = fixture();

    let err = fx
        .local
        .request(fx.remote_node.id(), "missing", Some(Bytes::from_static(&[1])))
        .unwrap_err();
    assert_eq!(err.code, RpcError::METHOD_NOT_FOUND);
    assert_eq!(err.message, "Method not found");
}

#[test]
fn unknown_notification_has_no_observable_effect() {
    let fx = fixture();

    fx.local.notify(fx.remote_node.id(), "missing", None);

    // both sides still function
    fx.remote.add_method("ping", reply(b"pong"));
    let result = fx.local.request(fx.remote_node.id(), "ping", None).unwrap();
    assert_eq!(result, Some(Bytes::from_static(b"pong")));
}

#[test]
fn request_times_out() {
    let fx = fixture_with(RpcConfig {
        timeout: Some(Duration::from_millis(150)),
        ..RpcConfig::default()
    });

    fx.remote
        .add_method("stall", |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            thread::sleep(Duration::from_secs(30));
            Ok(None)
        });

    let started = Instant::now();
    let err = fx
        .local
        .request(fx.remote_node.id(), "stall", None)
        .unwrap_err();
    assert_eq!(err.code, RpcError::TIMED_OUT);
    assert_eq!(err.message, "Request timed out");
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn disabled_timeout_waits_until_stop() {
    let fx = fixture_with(RpcConfig {
        timeout: None,
        ..RpcConfig::default()
    });

    fx.remote
        .add_method("stall", |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            thread::sleep(Duration::from_secs(30));
            Ok(None)
        });

    let local = Arc::clone(&fx.local);
    let peer = fx.remote_node.id().clone();
    let (tx, rx) = mpsc::channel();
    let caller = thread::spawn(move || {
        tx.send(local.request(&peer, "stall", None)).unwrap();
    });

    // no timer fires; the call stays pending
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());

    fx.local.stop();
    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.unwrap_err().code, RpcError::STOPPED);
    caller.join().unwrap();
}

#[test]
fn stop_rejects_every_outstanding_call() {
    let fx = fixture_with(RpcConfig {
        timeout: None,
        ..RpcConfig::default()
    });

    fx.remote
        .add_method("stall", |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            thread::sleep(Duration::from_secs(30));
            Ok(None)
        });
    fx.local.add_method("leftover", reply(b"x"));

    let mut calls = Vec::new();
    for _ in 0..3 {
        let local = Arc::clone(&fx.local);
        let peer = fx.remote_node.id().clone();
        calls.push(thread::spawn(move || local.request(&peer, "stall", None)));
    }
    thread::sleep(Duration::from_millis(200));

    fx.local.stop();

    for call in calls {
        let err = call.join().unwrap().unwrap_err();
        assert_eq!(err.code, RpcError::STOPPED);
        assert_eq!(err.message, "RPC module stopped");
    }
    // explicit lifecycle reset: the registry is cleared as well
    assert!(!fx.local.has_method("leftover"));
}

#[test]
fn uncorrelated_responses_are_dropped() {
    use swarmrpc::mux::{Messenger, MessengerConfig};
    use swarmrpc::wire::Envelope;
    use swarmrpc::DEFAULT_PROTOCOL;

    let fx = fixture();
    fx.remote.add_method("ping", reply(b"pong"));

    // the first call establishes the streams and consumes id 0
    let result = fx.local.request(fx.remote_node.id(), "ping", None).unwrap();
    assert_eq!(result, Some(Bytes::from_static(b"pong")));

    // inject a duplicate response for the resolved id and one for an id
    // that was never issued, bypassing the remote engine
    let raw = Messenger::with_config(
        fx.remote_node.clone(),
        MessengerConfig {
            protocol: DEFAULT_PROTOCOL.to_string(),
            ..MessengerConfig::default()
        },
    );
    raw.send(
        fx.local_node.id(),
        Envelope::response(0, Some(Bytes::from_static(b"late"))).encode(),
    )
    .unwrap();
    raw.send(
        fx.local_node.id(),
        Envelope::response(9999, Some(Bytes::from_static(b"ghost"))).encode(),
    )
    .unwrap();

    // neither frame affects any other call
    let result = fx.local.request(fx.remote_node.id(), "ping", None).unwrap();
    assert_eq!(result, Some(Bytes::from_static(b"pong")));
}

#[test]
fn consecutive_calls_reuse_one_stream() {
    let fx = fixture_with(RpcConfig {
        timeout: Some(Duration::from_millis(300)),
        ..RpcConfig::default()
    });
    fx.remote.add_method("ping", reply(b"pong"));

    fx.local.request(fx.remote_node.id(), "ping", None).unwrap();
    fx.local.request(fx.remote_node.id(), "ping", None).unwrap();
    assert_eq!(fx.local_node.streams_opened(fx.remote_node.id()), 1);
    // replies rode the adopted inbound stream; the remote opened none
    assert_eq!(fx.remote_node.streams_opened(fx.local_node.id()), 0);

    fx.local_node.sever(fx.remote_node.id());

    // the next call re-establishes once the dead queue is torn down
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if fx.local.request(fx.remote_node.id(), "ping", None).is_ok() {
            break;
        }
        assert!(Instant::now() < deadline, "stream never re-established");
        thread::sleep(Duration::from_millis(20));
    }
    assert!(fx.local_node.streams_opened(fx.remote_node.id()) >= 2);
}

#[test]
fn frames_on_one_stream_are_handled_in_order() {
    let fx = fixture();

    let counter = Arc::new(AtomicU32::new(0));
    let incr = Arc::clone(&counter);
    fx.remote.add_method(
        "slow-increment",
        move |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            thread::sleep(Duration::from_millis(150));
            incr.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        },
    );
    let read = Arc::clone(&counter);
    fx.remote
        .add_method("read", move |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            let value = read.load(Ordering::SeqCst);
            Ok(Some(Bytes::copy_from_slice(&value.to_be_bytes())))
        });

    // fire-and-forget first, so both frames ride the same stream back to
    // back; the second must observe the first handler's effect
    fx.local.notify(fx.remote_node.id(), "slow-increment", None);
    let result = fx
        .local
        .request(fx.remote_node.id(), "read", None)
        .unwrap()
        .unwrap();
    assert_eq!(result.as_ref(), 1u32.to_be_bytes());
}

#[test]
fn structured_method_error_is_forwarded_as_is() {
    let fx = fixture();

    fx.remote
        .add_method("fail", |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            Err(RpcError::with_data(7, "nope", Bytes::from_static(&[9, 9])).into())
        });

    let err = fx
        .local
        .request(fx.remote_node.id(), "fail", None)
        .unwrap_err();
    assert_eq!(err.code, 7);
    assert_eq!(err.message, "nope");
    assert_eq!(err.data, Some(Bytes::from_static(&[9, 9])));
}

#[test]
fn generic_method_error_gets_code_zero() {
    let fx = fixture();

    fx.remote
        .add_method("io-fail", |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            Err(MethodError::other(std::io::Error::other("disk on fire")))
        });

    let err = fx
        .local
        .request(fx.remote_node.id(), "io-fail", None)
        .unwrap_err();
    assert_eq!(err.code, 0);
    assert_eq!(err.message, "disk on fire");
}

#[test]
fn panicking_method_reports_unknown_error() {
    let fx = fixture();

    fx.remote
        .add_method("panic-str", |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            panic!("kaboom");
        });
    fx.remote
        .add_method("panic-any", |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            std::panic::panic_any(42u32);
        });

    let err = fx
        .local
        .request(fx.remote_node.id(), "panic-str", None)
        .unwrap_err();
    assert_eq!(err.code, RpcError::UNKNOWN);
    assert_eq!(err.message, "kaboom");

    let err = fx
        .local
        .request(fx.remote_node.id(), "panic-any", None)
        .unwrap_err();
    assert_eq!(err.code, RpcError::UNKNOWN);
    assert_eq!(err.message, "Unknown error");
}

#[test]
fn last_registration_wins() {
    let fx = fixture();

    fx.remote.add_method("dup", reply(b"one"));
    fx.remote.add_method("dup", reply(b"two"));

    let result = fx.local.request(fx.remote_node.id(), "dup", None).unwrap();
    assert_eq!(result, Some(Bytes::from_static(b"two")));
}

#[test]
fn restart_requires_methods_to_be_readded() {
    let fx = fixture_with(RpcConfig {
        timeout: Some(Duration::from_millis(300)),
        ..RpcConfig::default()
    });
    fx.remote.add_method("ping", reply(b"pong"));
    fx.local.request(fx.remote_node.id(), "ping", None).unwrap();

    fx.remote.stop();
    assert!(!fx.remote.has_method("ping"));
    fx.remote.start();

    // after the reset the method is gone until re-added
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match fx.local.request(fx.remote_node.id(), "ping", None) {
            Err(err) if err.code == RpcError::METHOD_NOT_FOUND => break,
            // transient while the severed stream tears down
            Err(_) => {
                assert!(Instant::now() < deadline, "restart never settled");
                thread::sleep(Duration::from_millis(20));
            }
            Ok(result) => panic!("method survived restart: {result:?}"),
        }
    }

    fx.remote.add_method("ping", reply(b"pong"));
    let result = fx.local.request(fx.remote_node.id(), "ping", None).unwrap();
    assert_eq!(result, Some(Bytes::from_static(b"pong")));
}

#[test]
fn request_to_unconnected_peer_fails_synchronously() {
    let net = MemNet::new();
    let a = net.join("a");
    let b = net.join("b");
    let rpc_a = Rpc::new(a.clone());
    let rpc_b = Rpc::new(b.clone());
    rpc_a.start();
    rpc_b.start();
    // deliberately no dial

    let started = Instant::now();
    let err = rpc_a.request(b.id(), "anything", None).unwrap_err();
    assert_eq!(err.code, RpcError::SEND_FAILURE);
    assert!(err.message.contains("not connected"), "got: {}", err.message);
    // synchronous failure: no pending call was parked on the timeout
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn concurrent_requests_resolve_independently() {
    let fx = fixture();

    fx.remote
        .add_method("echo", |params: Option<Bytes>, _: &PeerId| -> MethodResult {
            Ok(params)
        });

    let mut calls = Vec::new();
    for i in 0..16u8 {
        let local = Arc::clone(&fx.local);
        let peer = fx.remote_node.id().clone();
        calls.push(thread::spawn(move || {
            let result = local.request(&peer, "echo", Some(Bytes::from(vec![i]))).unwrap();
            assert_eq!(result, Some(Bytes::from(vec![i])));
        }));
    }
    for call in calls {
        call.join().unwrap();
    }

    // all sixteen interleaved calls shared one stream
    assert_eq!(fx.local_node.streams_opened(fx.remote_node.id()), 1);
}
