//! End-to-end relay test over loopback sockets.
//!
//! This test validates:
//! - A client with a fresh connect token reaches the server through the
//!   gateway on its first send ticks
//! - The server creates a session and its responses come back sealed
//! - The client goes Handshaking -> Connected without being challenged
//! - Server acknowledgments surface as delivered payload ids

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use skylane_common::time::unix_timestamp;
use skylane_core::crypto::KeyPair;
use skylane_relay::{Authority, Client, ClientStats, ConnectionState, Gateway, RelayConfig, Server, Terms};

/// Reserves a loopback port by binding and releasing it.
fn free_port() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

fn relay_config() -> RelayConfig {
    let gateway = KeyPair::generate();
    let auth = KeyPair::generate();

    let mut config = RelayConfig::default();
    config.network.gateway_address = free_port();
    config.network.server_address = free_port();
    config.network.gateway_internal_address = "127.0.0.1:0".parse().unwrap();
    config.network.client_address = "127.0.0.1:0".parse().unwrap();
    config.network.num_threads = 1;
    config.network.read_buffer = 256 * 1024;
    config.network.write_buffer = 256 * 1024;

    config.keys.gateway_private_key = Some(gateway.private_key().to_base64());
    config.keys.gateway_public_key = Some(gateway.public_key().to_string());
    config.keys.auth_private_key = Some(auth.private_key().to_base64());
    config.keys.auth_public_key = Some(auth.public_key().to_string());

    config.gateway.gateway_id = 11;
    config.server.server_id = 22;
    config.validate().unwrap();
    config
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_connects_through_gateway_without_challenge() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").with_test_writer().try_init();

    let mut config = relay_config();
    let authority = Authority::from_config(&config).unwrap();
    let token = authority
        .issue_connect_token(
            7,
            Terms {
                up_kbps: 256,
                down_kbps: 1024,
                packets_per_second: 20,
            },
            unix_timestamp(),
        )
        .unwrap();
    config.client.connect_token = Some(token.to_base64());

    let server = Arc::new(Server::new(config.clone()).unwrap());
    let gateway = Arc::new(Gateway::new(config.clone()).unwrap());
    let server_task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });
    let gateway_task = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move { gateway.run().await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = Arc::new(Client::from_config(&config).unwrap());
    assert_eq!(client.state(), ConnectionState::Handshaking);
    let client_task = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.run().await }
    });

    let connected = wait_until(|| client.state() == ConnectionState::Connected).await;
    assert!(connected, "client never connected: {client:?}");

    let stats = client.stats();
    assert_eq!(ClientStats::get(&stats.challenges), 0);
    assert!(ClientStats::get(&stats.received) >= 1);

    // Acks ride on later responses
    assert!(wait_until(|| ClientStats::get(&stats.delivered) >= 1).await);

    client.shutdown();
    gateway.shutdown();
    server.shutdown();
    client_task.await.unwrap().unwrap();
    gateway_task.await.unwrap().unwrap();
    server_task.await.unwrap().unwrap();

    assert!(!client.session_lapsed());
}

#[tokio::test]
async fn client_with_wrong_magic_never_connects() {
    let mut config = relay_config();
    let authority = Authority::from_config(&config).unwrap();
    let token = authority
        .issue_connect_token(
            8,
            Terms {
                up_kbps: 256,
                down_kbps: 1024,
                packets_per_second: 20,
            },
            unix_timestamp(),
        )
        .unwrap();
    config.client.connect_token = Some(token.to_base64());

    let gateway = Arc::new(Gateway::new(config.clone()).unwrap());
    let server = Arc::new(Server::new(config.clone()).unwrap());
    let gateway_task = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move { gateway.run().await }
    });
    let server_task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Same keys and token, different filter magic
    config.filter.magic = "CAcGBQQDAgE=".into();
    let client = Arc::new(Client::from_config(&config).unwrap());
    let client_task = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.run().await }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.state(), ConnectionState::Handshaking);
    assert!(ClientStats::get(&client.stats().sent) >= 1);
    assert_eq!(ClientStats::get(&client.stats().received), 0);

    client.shutdown();
    gateway.shutdown();
    server.shutdown();
    client_task.await.unwrap().unwrap();
    gateway_task.await.unwrap().unwrap();
    server_task.await.unwrap().unwrap();
}
