//! End-to-end forwarding through a ListenerManager.
//!
//! The forwarder dials the backend on the same port it listens on, so the
//! fake backends bind 127.0.0.2 / 127.0.0.3 while the forwarder binds
//! 127.0.0.1 on the same port number. Linux routes all of 127/8 to loopback.

#![cfg(target_os = "linux")]

mod common;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{spawn_echo_backend, ScriptedResolver};
use moxfwd::config::{ForwardedPort, PortRange};
use moxfwd::connection::{ConnectionTracker, ForwardingSettings, ListenerManager};
use moxfwd::{RelayEngine, Result, ShutdownCoordinator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Forwarder {
    addr: SocketAddr,
    coordinator: ShutdownCoordinator,
    tracker: ConnectionTracker,
    handle: JoinHandle<Result<()>>,
}

async fn start_forwarder(port: u16, resolver: Arc<ScriptedResolver>) -> Forwarder {
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
    let tracker = ConnectionTracker::new();
    let settings = ForwardingSettings {
        dial_timeout: Duration::from_secs(5),
        relay: RelayEngine::with_buffer_size(8192),
    };
    let port = ForwardedPort::new(port, PortRange::new(1, u16::MAX)).unwrap();

    let manager = ListenerManager::bind("127.0.0.1".parse().unwrap(), port, resolver, settings, tracker.clone())
        .await
        .expect("forwarder should bind");
    let addr = manager.local_addr().unwrap();
    let handle = tokio::spawn(manager.run(coordinator.subscribe()));

    Forwarder {
        addr,
        coordinator,
        tracker,
        handle,
    }
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

#[tokio::test]
async fn test_bytes_round_trip_unmodified() {
    let (backend, accepted) = spawn_echo_backend("127.0.0.2:0", b"A:").await;
    let fwd = start_forwarder(backend.port(), ScriptedResolver::found("127.0.0.2")).await;
    assert_eq!(fwd.addr.port(), backend.port());

    let client = TcpStream::connect(fwd.addr).await.unwrap();
    let (mut rd, mut wr) = client.into_split();

    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    let to_send = payload.clone();
    let writer = tokio::spawn(async move {
        wr.write_all(&to_send).await.unwrap();
        // Half-close: the echo backend finishes only after seeing EOF.
        wr.shutdown().await.unwrap();
        wr
    });

    let mut received = Vec::new();
    timeout(Duration::from_secs(10), rd.read_to_end(&mut received))
        .await
        .expect("relay did not complete")
        .unwrap();

    assert_eq!(&received[..2], b"A:");
    assert_eq!(received.len() - 2, payload.len());
    assert!(received[2..] == payload[..]);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    let _wr = writer.await.unwrap();
    assert!(fwd.tracker.wait_idle(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_absent_backend_closes_without_dialing() {
    let (backend, accepted) = spawn_echo_backend("127.0.0.2:0", b"A:").await;
    let resolver = ScriptedResolver::absent();
    let fwd = start_forwarder(backend.port(), Arc::clone(&resolver)).await;

    let mut client = TcpStream::connect(fwd.addr).await.unwrap();
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(2), client.read_to_end(&mut buf))
        .await
        .expect("inbound connection should be closed");

    assert!(read.is_err() || buf.is_empty());
    assert_eq!(resolver.calls(), 1);
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_refused_backend_closes_within_dial_timeout() {
    // Reserve a port on the backend address, then free it so the dial is refused.
    let unused = std::net::TcpListener::bind("127.0.0.2:0").unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let fwd = start_forwarder(port, ScriptedResolver::found("127.0.0.2")).await;

    let started = Instant::now();
    let mut client = TcpStream::connect(fwd.addr).await.unwrap();
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(6), client.read_to_end(&mut buf))
        .await
        .expect("inbound connection should be closed");

    assert!(read.is_err() || buf.is_empty());
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test]
async fn test_each_connection_resolves_current_address() {
    let (backend_a, accepted_a) = spawn_echo_backend("127.0.0.2:0", b"A:").await;
    let port = backend_a.port();
    let (_, accepted_b) = spawn_echo_backend(&format!("127.0.0.3:{}", port), b"B:").await;

    let resolver = ScriptedResolver::found("127.0.0.2");
    let fwd = start_forwarder(port, Arc::clone(&resolver)).await;

    let mut first = TcpStream::connect(fwd.addr).await.unwrap();
    assert_eq!(read_exactly(&mut first, 2).await, b"A:");
    first.write_all(b"one").await.unwrap();
    assert_eq!(read_exactly(&mut first, 3).await, b"one");

    // Simulated backend restart with a new address.
    resolver.set(Some("127.0.0.3"));

    let mut second = TcpStream::connect(fwd.addr).await.unwrap();
    assert_eq!(read_exactly(&mut second, 2).await, b"B:");
    second.write_all(b"two").await.unwrap();
    assert_eq!(read_exactly(&mut second, 3).await, b"two");

    // The first relay is still bound to the old backend.
    first.write_all(b"still here").await.unwrap();
    assert_eq!(read_exactly(&mut first, 10).await, b"still here");

    assert_eq!(accepted_a.load(Ordering::SeqCst), 1);
    assert_eq!(accepted_b.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_connections_are_independent() {
    let (backend, accepted) = spawn_echo_backend("127.0.0.2:0", b"A:").await;
    let fwd = start_forwarder(backend.port(), ScriptedResolver::found("127.0.0.2")).await;
    let addr = fwd.addr;

    let clients: Vec<_> = (0..8)
        .map(|i| {
            tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                let message = format!("client-{}", i);
                stream.write_all(message.as_bytes()).await.unwrap();
                let reply = read_exactly(&mut stream, 2 + message.len()).await;
                assert_eq!(&reply[2..], message.as_bytes());
            })
        })
        .collect();

    for client in clients {
        timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let (backend, _) = spawn_echo_backend("127.0.0.2:0", b"A:").await;
    let fwd = start_forwarder(backend.port(), ScriptedResolver::found("127.0.0.2")).await;

    fwd.coordinator.initiate_shutdown();
    let result = timeout(Duration::from_secs(2), fwd.handle)
        .await
        .expect("listener should stop")
        .unwrap();
    assert!(result.is_ok());

    assert!(TcpStream::connect(fwd.addr).await.is_err());
}
