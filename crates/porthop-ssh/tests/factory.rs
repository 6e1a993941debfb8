//! Timeout behavior of the russh-backed session factory

use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use porthop_core::{AuthMethod, HostConfig, TunnelError};
use porthop_ssh::{SessionFactory, SshSessionFactory};

/// A peer that accepts TCP connections and then says nothing, holding the
/// sockets open so the client sits in the protocol handshake forever.
async fn silent_peer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    port
}

#[tokio::test]
async fn open_against_a_stalling_peer_fails_within_the_timeout() {
    let port = silent_peer().await;
    let factory = SshSessionFactory::new(Duration::from_millis(300), Duration::from_secs(1));
    let host = HostConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: "relay".to_string(),
        auth: AuthMethod::Password {
            password: "secret".to_string(),
        },
        fingerprint: None,
    };

    let started = Instant::now();
    let err = factory.open(&host).await.unwrap_err();

    assert!(matches!(err, TunnelError::Network { .. }), "got {:?}", err);
    assert!(err.to_string().contains("timed out"));
    // The bound covers the whole open, not just the TCP connect
    assert!(started.elapsed() < Duration::from_secs(5));
}
