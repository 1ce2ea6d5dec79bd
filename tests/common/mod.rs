//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use moxfwd::resolver::{AbsentReason, BackendAddress, BackendResolver, Resolution};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Resolver whose answer can be swapped while connections are running
#[derive(Default)]
pub struct ScriptedResolver {
    current: Mutex<Option<IpAddr>>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn found(ip: &str) -> Arc<Self> {
        let resolver = Self::default();
        resolver.set(Some(ip));
        Arc::new(resolver)
    }

    pub fn absent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, ip: Option<&str>) {
        *self.current.lock().unwrap() = ip.map(|ip| ip.parse().unwrap());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackendResolver for ScriptedResolver {
    async fn resolve(&self) -> Resolution {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = *self.current.lock().unwrap();
        match current {
            Some(ip) => Resolution::Found(BackendAddress::new(ip)),
            None => Resolution::Absent(AbsentReason::NoInstance {
                prefix: "test-".to_string(),
            }),
        }
    }
}

/// Echo server that prefixes every reply with `tag` once per connection.
/// Returns its address and a counter of accepted connections.
pub async fn spawn_echo_backend(bind: &str, tag: &'static [u8]) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind(bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if stream.write_all(tag).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, accepted)
}
