//! Two in-process peers calling each other over `MemNet`.
//!
//! Run with: cargo run --example echo

use bytes::Bytes;
use swarmrpc::{MemNet, MethodResult, PeerId, Rpc, RpcError};

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::level_filters::LevelFilter::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .init();

    let net = MemNet::new();
    let alice_node = net.join("alice");
    let bob_node = net.join("bob");

    let alice = Rpc::new(alice_node.clone());
    let bob = Rpc::new(bob_node.clone());

    bob.add_method(
        "echo",
        |params: Option<Bytes>, sender: &PeerId| -> MethodResult {
            tracing::info!(%sender, "echo called");
            Ok(params)
        },
    );
    bob.add_method(
        "reject",
        |_: Option<Bytes>, _: &PeerId| -> MethodResult {
            Err(RpcError::new(7, "not today").into())
        },
    );

    alice.start();
    bob.start();
    alice_node
        .dial(bob_node.id())
        .expect("bob should be joinable");

    let reply = alice
        .request(
            bob_node.id(),
            "echo",
            Some(Bytes::from_static(b"hello, bob")),
        )
        .expect("echo should succeed");
    println!(
        "bob echoed: {}",
        String::from_utf8_lossy(reply.as_deref().unwrap_or_default())
    );

    match alice.request(bob_node.id(), "reject", None) {
        Err(err) => println!("bob rejected us: {err}"),
        Ok(_) => unreachable!("reject always fails"),
    }

    // fire-and-forget: no reply, failures swallowed
    alice.notify(bob_node.id(), "echo", Some(Bytes::from_static(b"bye")));

    alice.stop();
    bob.stop();
}
