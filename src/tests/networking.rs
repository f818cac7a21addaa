// Networking scenarios - convergence, leave, relay topology, rejection

use super::{eventually, TestNode};
use crate::identity::Identity;
use crate::network::swarm::Relay;
use crate::network::GossipMessage;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const CONVERGE: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_two_nodes_converge_via_hello() {
    let a = TestNode::spawn().await;
    let b = TestNode::spawn().await;

    b.connect_to(&a).await;

    // The connection hellos alone converge both sides, no ticks needed
    assert!(eventually(CONVERGE, || async { a.knows(&b).await && b.knows(&a).await }).await);
    assert_eq!(a.peer_count().await, 2);
    assert_eq!(b.peer_count().await, 2);
    assert_eq!(a.swarm.direct_count(), 1);
    assert_eq!(b.swarm.direct_count(), 1);
}

#[tokio::test]
async fn test_heartbeat_ticks_keep_sequence_moving() {
    let a = TestNode::spawn().await;
    let b = TestNode::spawn().await;
    b.connect_to(&a).await;
    assert!(eventually(CONVERGE, || async { a.knows(&b).await }).await);

    b.engine.tick().await;
    b.engine.tick().await;
    b.engine.tick().await;

    assert!(
        eventually(CONVERGE, || async {
            a.registry.read().await.last_seq(b.identity.id()) == Some(3)
        })
        .await
    );
}

#[tokio::test]
async fn test_graceful_leave_removes_peer_quickly() {
    let a = TestNode::spawn().await;
    let b = TestNode::spawn().await;
    b.connect_to(&a).await;
    assert!(eventually(CONVERGE, || async { a.knows(&b).await }).await);

    b.engine.broadcast_leave();

    assert!(eventually(CONVERGE, || async { !a.knows(&b).await }).await);
    assert_eq!(a.peer_count().await, 1);
}

#[tokio::test]
async fn test_socket_close_removes_direct_neighbor() {
    let a = TestNode::spawn().await;
    let b = TestNode::spawn().await;
    b.connect_to(&a).await;
    assert!(eventually(CONVERGE, || async { a.knows(&b).await }).await);

    // B dies without a LEAVE; the socket close unpins it from A
    b.swarm.shutdown();

    assert!(eventually(CONVERGE, || async { !a.knows(&b).await }).await);
}

#[tokio::test]
async fn test_triangle_relay_reaches_indirect_peer() {
    // A - B - C chain: A and C are never directly connected
    let a = TestNode::spawn().await;
    let b = TestNode::spawn().await;
    let c = TestNode::spawn().await;

    a.connect_to(&b).await;
    c.connect_to(&b).await;
    assert!(eventually(CONVERGE, || async {
        b.knows(&a).await && b.knows(&c).await
    })
    .await);

    // A's next heartbeat travels A -> B (hops 0), B -> C (hops 1)
    a.engine.tick().await;

    assert!(eventually(CONVERGE, || async { c.knows(&a).await }).await);
    assert_eq!(c.swarm.direct_count(), 1);
}

#[tokio::test]
async fn test_flood_depth_is_bounded_by_hop_limit() {
    // Chain A - B - C - D - E. A message leaves A with hops 0 and may be
    // relayed twice, so it reaches D (received at hops 2) but never E.
    let a = TestNode::spawn().await;
    let b = TestNode::spawn().await;
    let c = TestNode::spawn().await;
    let d = TestNode::spawn().await;
    let e = TestNode::spawn().await;

    a.connect_to(&b).await;
    b.connect_to(&c).await;
    c.connect_to(&d).await;
    d.connect_to(&e).await;
    assert!(eventually(CONVERGE, || async {
        b.knows(&a).await && c.knows(&b).await && d.knows(&c).await && e.knows(&d).await
    })
    .await);

    a.engine.tick().await;
    a.engine.tick().await;

    assert!(eventually(CONVERGE, || async { d.knows(&a).await }).await);

    // Let the flood settle, then confirm the fifth node stayed dark
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!e.knows(&a).await);
}

#[tokio::test]
async fn test_raw_socket_invalid_pow_is_counted() {
    let a = TestNode::spawn().await;
    let rogue = Identity::generate().unwrap();

    // Find a nonce that fails the puzzle
    let bad_nonce = (0u64..).find(|n| !crate::identity::pow::verify(rogue.id(), *n)).unwrap();

    let mut stream = TcpStream::connect(a.addr).await.unwrap();
    let msg = GossipMessage::Heartbeat {
        id: rogue.id().to_string(),
        seq: 1,
        hops: 0,
        nonce: bad_nonce,
        sig: rogue.sign_seq(1),
        loc: None,
    };
    stream
        .write_all(msg.encode().unwrap().as_bytes())
        .await
        .unwrap();

    assert!(
        eventually(CONVERGE, || async { a.diagnostics.current().invalid_pow == 1 }).await
    );
    assert!(!a.registry.read().await.contains(rogue.id()));
}

#[tokio::test]
async fn test_raw_socket_replay_is_counted() {
    let a = TestNode::spawn().await;
    let peer = Identity::generate().unwrap();

    let mut stream = TcpStream::connect(a.addr).await.unwrap();
    let msg = GossipMessage::Heartbeat {
        id: peer.id().to_string(),
        seq: 7,
        hops: 0,
        nonce: peer.nonce(),
        sig: peer.sign_seq(7),
        loc: None,
    };
    let frame = msg.encode().unwrap();
    stream.write_all(frame.as_bytes()).await.unwrap();
    stream.write_all(frame.as_bytes()).await.unwrap();

    assert!(
        eventually(CONVERGE, || async {
            a.diagnostics.current().duplicate_seq == 1
        })
        .await
    );
    assert!(a.registry.read().await.contains(peer.id()));
}
