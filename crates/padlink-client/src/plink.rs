//! Peer-Linker client session.
//!
//! Either party of a link may initiate: the initiator names a target pad
//! and its `Link` request blocks until the target's authenticator decides;
//! the responder answers `LinkAuth` questions through
//! [`PeerLinkerHooks::auth_peer`]. Once linked, the session is an opaque
//! byte channel: [`PeerLinkerSession::send`] relays through the broker,
//! inbound payloads surface via [`PeerLinkerHooks::on_received`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use padlink_core::{NO_ID, ServerLocation, Session, SessionCore, SessionError, SessionHandler};
use padlink_proto::{
    Frame, PlinkKind, common,
    payloads::plink::{Link, LinkAuth, LinkAuthResponse},
};
use thiserror::Error;

/// Event kind fired when the link is established (wildcard id).
pub const LINKED: u32 = 1;

/// Peer-Linker client errors.
#[derive(Debug, Error)]
pub enum PlinkClientError {
    /// Transport setup failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The broker rejected `ActivateSession`.
    #[error("session activation failed")]
    ActivationFailed,
    /// The broker rejected `RegisterPad`.
    #[error("pad registration failed")]
    RegistrationFailed,
    /// The link request was denied or failed.
    #[error("pad link denied")]
    LinkDenied,
    /// The session closed before the link was established.
    #[error("session closed")]
    Disconnected,
}

/// Protocol hooks a Peer-Linker client provides.
#[async_trait]
pub trait PeerLinkerHooks: Send + Sync + 'static {
    /// Decide whether `peer_name` may link with this pad (responder role).
    fn auth_peer(&self, peer_name: &str, secret: &[u8]) -> bool {
        let _ = (peer_name, secret);
        false
    }

    /// Opaque bytes relayed from the linked pad.
    async fn on_received(&self, session: &Arc<SessionCore>, payload: &[u8]);

    /// Called once when the session stops.
    fn on_disconnected(&self) {}
}

/// Peer to link with (initiator role).
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Target pad name.
    pub pad_name: String,
    /// Secret shown to the target's authenticator.
    pub secret: Vec<u8>,
}

/// Session parameters.
#[derive(Debug, Clone)]
pub struct PeerLinkerParams {
    /// Broker endpoint.
    pub peer_linker: ServerLocation,
    /// Pad name to register.
    pub pad_name: String,
    /// `Some` makes this session the link initiator.
    pub peer: Option<PeerInfo>,
    /// User certificate for session activation.
    pub user_certificate: String,
}

struct PlinkHandler {
    hooks: Arc<dyn PeerLinkerHooks>,
}

#[async_trait]
impl SessionHandler for PlinkHandler {
    async fn on_frame(&self, session: &Arc<SessionCore>, frame: &Frame) -> bool {
        match PlinkKind::from_u16(frame.kind) {
            Some(PlinkKind::Unlinked) => {
                tracing::info!("unlinked by peer");
                session.stop();
                true
            },
            Some(PlinkKind::LinkAuth) => {
                let Ok(auth) = LinkAuth::from_frame(frame) else {
                    return false;
                };
                let ok = self.hooks.auth_peer(&auth.requester, &auth.secret);
                tracing::info!(requester = auth.requester, ok, "received link request");

                let resp = LinkAuthResponse { ok, requester: auth.requester };
                let core = Arc::clone(session);
                session
                    .send_detached(
                        |id| resp.to_frame(id),
                        move |result| {
                            if ok {
                                // the link exists once the broker confirmed
                                // our acceptance
                                core.events().invoke(LINKED, NO_ID, u32::from(result == 1));
                            } else if result == 0 {
                                tracing::warn!("link auth response rejected by broker");
                            }
                        },
                    )
                    .await
            },
            Some(PlinkKind::Payload) => {
                self.hooks.on_received(session, &frame.body).await;
                true
            },
            _ => false,
        }
    }
}

/// A Peer-Linker client session.
///
/// Construction completes the whole handshake: activation, pad
/// registration, and the link (initiated or answered).
pub struct PeerLinkerSession {
    session: Session,
}

impl std::fmt::Debug for PeerLinkerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLinkerSession").finish_non_exhaustive()
    }
}

impl PeerLinkerSession {
    /// Connect, activate, register the pad and establish the link.
    pub async fn start(
        params: PeerLinkerParams,
        hooks: Arc<dyn PeerLinkerHooks>,
    ) -> Result<Self, PlinkClientError> {
        let handler = Arc::new(PlinkHandler { hooks: Arc::clone(&hooks) });
        let session = Session::start(&params.peer_linker, handler).await?;
        let core = Arc::clone(session.core());
        core.set_on_disconnected({
            let hooks = Arc::clone(&hooks);
            move || hooks.on_disconnected()
        });

        if !core
            .send_request(common::ACTIVATE_SESSION, Bytes::from(params.user_certificate))
            .await
        {
            session.stop();
            return Err(PlinkClientError::ActivationFailed);
        }

        if !core
            .send_request(PlinkKind::RegisterPad.to_u16(), Bytes::from(params.pad_name.clone()))
            .await
        {
            session.stop();
            return Err(PlinkClientError::RegistrationFailed);
        }
        tracing::info!(pad_name = params.pad_name, "pad created");

        match params.peer {
            Some(peer) => {
                // initiator: the Link result is the authenticator's verdict
                let link = Link { requestee: peer.pad_name, secret: peer.secret };
                if !core.request_with(|id| link.to_frame(id)).await {
                    tracing::warn!("pad link authentication denied");
                    session.stop();
                    return Err(PlinkClientError::LinkDenied);
                }
            },
            None => {
                // responder: wait for an accepted LinkAuth exchange
                match core.events().wait_for(LINKED, NO_ID).await {
                    Some(1) => {},
                    _ => {
                        session.stop();
                        return Err(PlinkClientError::Disconnected);
                    },
                }
            },
        }

        Ok(Self { session })
    }

    /// Relay opaque bytes to the linked pad.
    pub async fn send(&self, payload: &[u8]) -> bool {
        self.session
            .core()
            .send_reply(PlinkKind::Payload.to_u16(), 0, Bytes::copy_from_slice(payload))
            .await
    }

    /// Tear down the link at the broker, then stop.
    pub async fn unlink(&self) -> bool {
        let ok = self.session.core().send_request(PlinkKind::Unlink.to_u16(), Bytes::new()).await;
        self.session.stop();
        ok
    }

    /// Shared session state (used by layered protocols).
    pub fn core(&self) -> &Arc<SessionCore> {
        self.session.core()
    }

    /// Whether the session is still live.
    pub fn is_connected(&self) -> bool {
        self.session.core().is_connected()
    }

    /// Stop the session (idempotent).
    pub fn stop(&self) {
        self.session.stop();
    }

    /// Wait until the session has stopped.
    pub async fn closed(&self) {
        self.session.closed().await;
    }
}

/// Convenience hooks built from closures.
pub struct FnHooks<A, R>
where
    A: Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
    R: Fn(&[u8]) + Send + Sync + 'static,
{
    /// Authentication predicate.
    pub auth: A,
    /// Payload callback.
    pub on_received: R,
}

#[async_trait]
impl<A, R> PeerLinkerHooks for FnHooks<A, R>
where
    A: Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
    R: Fn(&[u8]) + Send + Sync + 'static,
{
    fn auth_peer(&self, peer_name: &str, secret: &[u8]) -> bool {
        (self.auth)(peer_name, secret)
    }

    async fn on_received(&self, _session: &Arc<SessionCore>, payload: &[u8]) {
        (self.on_received)(payload);
    }
}
