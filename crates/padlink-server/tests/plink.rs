//! Peer-Linker end-to-end tests: real broker, real TCP, real clients.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use padlink_client::{FnHooks, PeerInfo, PeerLinkerParams, PeerLinkerSession, PlinkClientError};
use padlink_core::{ServerLocation, Session, SessionCore, SessionHandler};
use padlink_proto::{Frame, PlinkKind, common, payloads::plink::LinkAuthResponse};
use padlink_server::{ActivationConfig, PeerLinkerDriver, RuntimeConfig, Server};
use tokio::sync::mpsc;

async fn spawn_broker() -> ServerLocation {
    let driver = PeerLinkerDriver::new(ActivationConfig::default());
    let server = Server::bind("127.0.0.1:0", driver, RuntimeConfig::default())
        .await
        .expect("bind broker");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    ServerLocation { host: "127.0.0.1".to_owned(), port: addr.port() }
}

fn responder_params(server: &ServerLocation, pad: &str) -> PeerLinkerParams {
    PeerLinkerParams {
        peer_linker: server.clone(),
        pad_name: pad.to_owned(),
        peer: None,
        user_certificate: "cert".to_owned(),
    }
}

fn initiator_params(
    server: &ServerLocation,
    pad: &str,
    target: &str,
    secret: &[u8],
) -> PeerLinkerParams {
    PeerLinkerParams {
        peer_linker: server.clone(),
        pad_name: pad.to_owned(),
        peer: Some(PeerInfo { pad_name: target.to_owned(), secret: secret.to_vec() }),
        user_certificate: "cert".to_owned(),
    }
}

/// Start the initiator, retrying while the responder has not registered
/// its pad yet.
async fn start_initiator(
    params: PeerLinkerParams,
) -> Result<PeerLinkerSession, PlinkClientError> {
    start_initiator_with(params, |_| {}).await
}

async fn start_initiator_with(
    params: PeerLinkerParams,
    on_received: impl Fn(&[u8]) + Send + Sync + Clone + 'static,
) -> Result<PeerLinkerSession, PlinkClientError> {
    let mut last = None;
    for _ in 0..50 {
        match PeerLinkerSession::start(params.clone(), Arc::new(FnHooks {
            auth: |_: &str, _: &[u8]| false,
            on_received: on_received.clone(),
        }))
        .await
        {
            Ok(session) => return Ok(session),
            Err(e) => last = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(last.expect("at least one attempt"))
}

/// Link with a shared secret, relay a payload both ways, observe the
/// Unlinked notification on disconnect.
#[tokio::test]
async fn link_with_secret_and_relay() {
    let server = spawn_broker().await;

    let (payload_tx, mut payload_rx) = mpsc::channel::<Vec<u8>>(8);
    let responder = tokio::spawn({
        let params = responder_params(&server, "1");
        async move {
            PeerLinkerSession::start(
                params,
                Arc::new(FnHooks {
                    auth: |name: &str, secret: &[u8]| name == "2" && secret == b"SECRET",
                    on_received: move |payload: &[u8]| {
                        let _ = payload_tx.try_send(payload.to_vec());
                    },
                }),
            )
            .await
        }
    });

    let (echo_tx, mut echo_rx) = mpsc::channel::<Vec<u8>>(8);
    let initiator = start_initiator_with(
        initiator_params(&server, "2", "1", b"SECRET"),
        move |payload: &[u8]| {
            let _ = echo_tx.try_send(payload.to_vec());
        },
    )
    .await
    .expect("link should be accepted");
    let responder = responder.await.expect("task").expect("responder links");

    // opaque payloads cross the relay byte-identical, in both directions
    assert!(initiator.send(b"some data, \x00 bytes included").await);
    let relayed = tokio::time::timeout(Duration::from_secs(5), payload_rx.recv())
        .await
        .expect("payload in time")
        .expect("payload");
    assert_eq!(relayed, b"some data, \x00 bytes included");

    assert!(responder.send(b"reply from the authenticator").await);
    let relayed = tokio::time::timeout(Duration::from_secs(5), echo_rx.recv())
        .await
        .expect("payload in time")
        .expect("payload");
    assert_eq!(relayed, b"reply from the authenticator");

    // peer disconnect surfaces as Unlinked and stops the session
    initiator.stop();
    tokio::time::timeout(Duration::from_secs(5), responder.closed())
        .await
        .expect("responder stops after peer disconnect");
    assert!(!responder.is_connected());
}

/// A denied link fails the initiator's request; the authenticator's
/// session survives and can accept a later attempt.
#[tokio::test]
async fn denied_link_leaves_authenticator_alive() {
    let server = spawn_broker().await;

    let responder = tokio::spawn({
        let params = responder_params(&server, "1");
        async move {
            PeerLinkerSession::start(
                params,
                Arc::new(FnHooks {
                    auth: |name: &str, secret: &[u8]| name == "2" && secret == b"SECRET",
                    on_received: |_: &[u8]| {},
                }),
            )
            .await
        }
    });

    // let the responder register its pad first
    tokio::time::sleep(Duration::from_millis(500)).await;

    // wrong secret: denied
    let denied = PeerLinkerSession::start(
        initiator_params(&server, "2", "1", b"WRONG"),
        Arc::new(FnHooks { auth: |_: &str, _: &[u8]| false, on_received: |_: &[u8]| {} }),
    )
    .await;
    assert!(matches!(denied, Err(PlinkClientError::LinkDenied)));

    // correct secret on a fresh connection: accepted, proving "1" survived
    let accepted = start_initiator(initiator_params(&server, "2", "1", b"SECRET")).await;
    assert!(accepted.is_ok());
    responder.await.expect("task").expect("responder links eventually");
}

struct Capture {
    frames: mpsc::Sender<Frame>,
}

#[async_trait::async_trait]
impl SessionHandler for Capture {
    async fn on_frame(&self, _session: &Arc<SessionCore>, frame: &Frame) -> bool {
        let _ = self.frames.try_send(frame.clone());
        true
    }
}

async fn raw_client(server: &ServerLocation) -> (Session, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(16);
    let connected = padlink_core::transport::connect(server).await.expect("connect");
    let session = Session::attach(connected, Arc::new(Capture { frames: tx }));
    assert!(session.core().send_request(common::ACTIVATE_SESSION, Bytes::from_static(b"c")).await);
    (session, rx)
}

/// Broker crash-safety of pending auth state: the requester disconnects
/// before the authenticator answers; the late answer is an error and the
/// authenticator stays usable.
#[tokio::test]
async fn pending_auth_is_cleared_when_requester_disconnects() {
    let server = spawn_broker().await;

    let (auth_session, mut auth_frames) = raw_client(&server).await;
    assert!(
        auth_session
            .core()
            .send_request(PlinkKind::RegisterPad.to_u16(), Bytes::from_static(b"1"))
            .await
    );

    let (req_session, _req_frames) = raw_client(&server).await;
    assert!(
        req_session
            .core()
            .send_request(PlinkKind::RegisterPad.to_u16(), Bytes::from_static(b"2"))
            .await
    );

    // fire the Link and vanish before the authenticator answers
    let link = padlink_proto::payloads::plink::Link {
        requestee: "1".to_owned(),
        secret: b"s".to_vec(),
    };
    assert!(req_session.core().send_frame(link.to_frame(1234).expect("encode")).await);

    let auth_request = tokio::time::timeout(Duration::from_secs(5), auth_frames.recv())
        .await
        .expect("auth question in time")
        .expect("auth question");
    assert_eq!(auth_request.kind, PlinkKind::LinkAuth.to_u16());

    req_session.stop();
    // give the broker a moment to process the disconnect
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the late answer must fail (requester pad is gone)
    let resp = LinkAuthResponse { ok: true, requester: "2".to_owned() };
    let accepted = auth_session.core().request_with(|id| resp.to_frame(id)).await;
    assert!(!accepted, "late auth answer must be rejected");

    // the authenticator session itself is still alive
    assert!(auth_session.core().is_connected());
    assert!(
        auth_session.core().send_request(PlinkKind::UnregisterPad.to_u16(), Bytes::new()).await
    );
}

/// Explicit Unlink notifies the peer.
#[tokio::test]
async fn unlink_notifies_peer() {
    let server = spawn_broker().await;

    let responder = tokio::spawn({
        let params = responder_params(&server, "left");
        async move {
            PeerLinkerSession::start(
                params,
                Arc::new(FnHooks {
                    auth: |_: &str, _: &[u8]| true,
                    on_received: |_: &[u8]| {},
                }),
            )
            .await
        }
    });

    let initiator = start_initiator(initiator_params(&server, "right", "left", b""))
        .await
        .expect("link");
    let responder = responder.await.expect("task").expect("responder links");

    assert!(initiator.unlink().await);
    tokio::time::timeout(Duration::from_secs(5), responder.closed())
        .await
        .expect("responder sees Unlinked");
}
