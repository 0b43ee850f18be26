//! Channel-Hub end-to-end tests: real broker, real TCP, real clients.

use std::sync::{Arc, Mutex};

use padlink_client::{ChannelHubClient, ChannelHubParams, PadRequestHandler};
use padlink_core::ServerLocation;
use padlink_server::{ActivationConfig, ChannelHubDriver, RuntimeConfig, Server};

async fn spawn_broker() -> ServerLocation {
    let driver = ChannelHubDriver::new(ActivationConfig::default());
    let server = Server::bind("127.0.0.1:0", driver, RuntimeConfig::default())
        .await
        .expect("bind broker");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    ServerLocation { host: "127.0.0.1".to_owned(), port: addr.port() }
}

fn params(server: &ServerLocation) -> ChannelHubParams {
    ChannelHubParams { channel_hub: server.clone(), user_certificate: "cert".to_owned() }
}

/// Channel registration, listing in registration order, unregistration,
/// and duplicate rejection.
#[tokio::test]
async fn register_list_unregister() {
    let server = spawn_broker().await;
    let c1 = ChannelHubClient::start(params(&server), None).await.expect("connect");

    assert!(c1.register_channel("channel1").await);
    assert!(c1.register_channel("channel2").await);
    assert!(c1.register_channel("channel3").await);

    let channels = c1.get_channels().await.expect("channel list");
    assert_eq!(channels, vec!["channel1", "channel2", "channel3"]);

    assert!(c1.unregister_channel("channel1").await);
    assert!(c1.unregister_channel("channel3").await);

    let channels = c1.get_channels().await.expect("channel list");
    assert_eq!(channels, vec!["channel2"]);

    // live name cannot be taken again
    assert!(!c1.register_channel("channel2").await);
}

fn counting_handler() -> PadRequestHandler {
    let counts: Arc<Mutex<(u32, u32)>> = Arc::new(Mutex::new((0, 0)));
    Box::new(move |channel| {
        let mut counts = counts.lock().unwrap();
        match channel {
            "a" if counts.0 < 2 => {
                counts.0 += 1;
                Some(format!("pad_a_{}", counts.0))
            },
            "b" if counts.1 < 2 => {
                counts.1 += 1;
                Some(format!("pad_b_{}", counts.1))
            },
            _ => None,
        }
    })
}

/// Pad requests are dispatched to the producer and answered in order;
/// denials and unknown channels come back as `None`.
#[tokio::test]
async fn pad_request_dispatch() {
    let server = spawn_broker().await;

    let c1 = ChannelHubClient::start(params(&server), Some(counting_handler()))
        .await
        .expect("producer connects");
    let c2 = ChannelHubClient::start(params(&server), None).await.expect("consumer connects");

    assert!(c1.register_channel("a").await);
    assert!(c1.register_channel("b").await);

    assert_eq!(c2.request_pad("a").await.as_deref(), Some("pad_a_1"));
    assert_eq!(c2.request_pad("b").await.as_deref(), Some("pad_b_1"));
    assert_eq!(c2.request_pad("a").await.as_deref(), Some("pad_a_2"));
    assert_eq!(c2.request_pad("b").await.as_deref(), Some("pad_b_2"));
    assert_eq!(c2.request_pad("a").await, None);
    assert_eq!(c2.request_pad("b").await, None);
    assert_eq!(c2.request_pad("c").await, None);
}

/// Channels disappear with their producer; a pending request is failed
/// rather than left hanging.
#[tokio::test]
async fn producer_disconnect_cleans_up() {
    let server = spawn_broker().await;

    let c1 = ChannelHubClient::start(params(&server), Some(Box::new(|_: &str| None)))
        .await
        .expect("producer connects");
    let c2 = ChannelHubClient::start(params(&server), None).await.expect("consumer connects");

    assert!(c1.register_channel("ephemeral").await);
    assert_eq!(c2.get_channels().await.expect("list"), vec!["ephemeral"]);

    c1.stop();
    // the broker scrubs the producer's channels on disconnect
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if c2.get_channels().await == Some(Vec::new()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("channel list drains");

    // a request against the vanished channel fails cleanly
    assert_eq!(c2.request_pad("ephemeral").await, None);
}

/// Unregistering someone else's channel is rejected.
#[tokio::test]
async fn unregister_requires_ownership() {
    let server = spawn_broker().await;

    let c1 = ChannelHubClient::start(params(&server), None).await.expect("owner connects");
    let c2 = ChannelHubClient::start(params(&server), None).await.expect("other connects");

    assert!(c1.register_channel("owned").await);
    assert!(!c2.unregister_channel("owned").await);
    assert_eq!(c1.get_channels().await.expect("list"), vec!["owned"]);
}
