//! ICE session on top of the Peer-Linker.
//!
//! Uses the linked pad as the signaling path: session descriptions and
//! trickled candidates travel as [`IceMessage`]s inside `Payload` frames
//! until the ICE agent reports connectivity, after which packets go
//! directly peer-to-peer.
//!
//! The ICE transport itself is an external collaborator behind
//! [`IceAgent`]/[`IceAgentFactory`]: the session only drives descriptions,
//! candidates and the connected/failed transitions.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use padlink_core::{NO_ID, NO_VALUE, ServerLocation, SessionCore};
use padlink_proto::{PlinkKind, payloads::ice::IceMessage};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};

use crate::plink::{PeerInfo, PeerLinkerHooks, PeerLinkerParams, PeerLinkerSession, PlinkClientError};

/// Event kind fired when the agent reports connectivity (wildcard id).
pub const CONNECTED: u32 = 2;
/// Event kind fired when the remote description has been applied.
pub const SDP_SET: u32 = 3;
/// Event kind fired when the peer finished gathering.
pub const REMOTE_GATHERING_DONE: u32 = 4;

/// Local port range used by the controlled (responder) side.
pub const CONTROLLED_PORT_RANGE: (u16, u16) = (60000, 61000);

/// ICE session errors.
#[derive(Debug, Error)]
pub enum IceError {
    /// The signaling handshake failed.
    #[error(transparent)]
    Signaling(#[from] PlinkClientError),
    /// The ICE agent failed.
    #[error("ICE agent error: {0}")]
    Agent(String),
    /// The signaling session closed during bring-up.
    #[error("signaling session closed")]
    Disconnected,
    /// The agent never reached the connected state.
    #[error("ICE connectivity failed")]
    ConnectFailed,
}

/// Result of a direct peer-to-peer send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPacketResult {
    /// Packet handed to the transport.
    Success,
    /// Transport buffer full; retry later.
    WouldBlock,
    /// Packet exceeds the transport datagram limit.
    MessageTooLarge,
    /// Anything else.
    UnknownError,
}

/// Agent configuration derived from the session parameters and role.
#[derive(Debug, Clone)]
pub struct IceConfig {
    /// STUN server for reflexive candidates.
    pub stun_server: ServerLocation,
    /// Optional TURN relay.
    pub turn_server: Option<ServerLocation>,
    /// Port range constraint; set for the controlled side.
    pub local_port_range: Option<(u16, u16)>,
    /// Whether this agent is the controlling side.
    pub controlling: bool,
}

/// Events an agent reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceAgentEvent {
    /// A new local candidate to trickle to the peer.
    Candidate(String),
    /// Local candidate gathering finished.
    GatheringDone,
    /// Connectivity established (`true`) or failed (`false`).
    ConnectedChanged(bool),
    /// A datagram arrived from the peer.
    PacketReceived(Vec<u8>),
}

/// The ICE transport, as seen by the session.
pub trait IceAgent: Send + Sync {
    /// Local session description.
    fn local_description(&self) -> Result<String, IceError>;
    /// Apply the peer's session description.
    fn set_remote_description(&self, sdp: &str) -> Result<(), IceError>;
    /// Apply one trickled candidate from the peer.
    fn add_remote_candidate(&self, sdp: &str) -> Result<(), IceError>;
    /// The peer finished gathering.
    fn set_remote_gathering_done(&self) {}
    /// Start gathering local candidates.
    fn gather_candidates(&self);
    /// Send a datagram directly to the peer.
    fn send(&self, payload: &[u8]) -> SendPacketResult;
}

/// Creates agents; events go to the supplied channel.
pub trait IceAgentFactory: Send + Sync {
    /// Create an agent for one session.
    fn create(
        &self,
        config: &IceConfig,
        events: mpsc::Sender<IceAgentEvent>,
    ) -> Result<Arc<dyn IceAgent>, IceError>;
}

/// Session parameters.
#[derive(Debug, Clone)]
pub struct IceSessionParams {
    /// Peer-Linker broker endpoint.
    pub peer_linker: ServerLocation,
    /// Pad name to register.
    pub pad_name: String,
    /// Target pad; `Some` makes this session controlling.
    pub target_pad_name: Option<String>,
    /// Secret shown to the target's authenticator.
    pub link_secret: Vec<u8>,
    /// User certificate for session activation.
    pub user_certificate: String,
    /// STUN server for the agent.
    pub stun_server: ServerLocation,
    /// Optional TURN relay for the agent.
    pub turn_server: Option<ServerLocation>,
    /// Wait for the peer's `GatheringDone` before waiting for
    /// connectivity. Not required by the protocol; off by default.
    pub wait_remote_gathering: bool,
}

/// Slot the signaling hooks wait on until the agent exists.
///
/// The peer's description can arrive right after the link completes,
/// before this side constructed its agent; handling blocks here (frames of
/// one session are processed in order, so nothing is lost).
#[derive(Default)]
struct AgentSlot {
    inner: Mutex<Option<Arc<dyn IceAgent>>>,
    ready: Notify,
}

impl AgentSlot {
    fn set(&self, agent: Arc<dyn IceAgent>) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(agent);
        drop(slot);
        self.ready.notify_waiters();
    }

    async fn wait(&self) -> Arc<dyn IceAgent> {
        loop {
            let ready = self.ready.notified();
            if let Some(agent) =
                self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
            {
                return agent;
            }
            ready.await;
        }
    }
}

type AuthPredicate = Box<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;

struct IceHooks {
    agent: AgentSlot,
    auth: AuthPredicate,
}

#[async_trait]
impl PeerLinkerHooks for IceHooks {
    fn auth_peer(&self, peer_name: &str, secret: &[u8]) -> bool {
        (self.auth)(peer_name, secret)
    }

    async fn on_received(&self, session: &Arc<SessionCore>, payload: &[u8]) {
        match IceMessage::decode(payload) {
            Ok(IceMessage::SessionDescription(sdp)) => {
                tracing::debug!("received remote description");
                let agent = self.agent.wait().await;
                if let Err(e) = agent.set_remote_description(&sdp) {
                    tracing::warn!("failed to set remote description: {e}");
                    session.stop();
                    return;
                }
                session.events().invoke(SDP_SET, NO_ID, NO_VALUE);
            },
            Ok(IceMessage::Candidate(sdp)) => {
                tracing::debug!("received remote candidate");
                let agent = self.agent.wait().await;
                if let Err(e) = agent.add_remote_candidate(&sdp) {
                    tracing::warn!("failed to add remote candidate: {e}");
                }
            },
            Ok(IceMessage::GatheringDone) => {
                tracing::debug!("remote gathering done");
                let agent = self.agent.wait().await;
                agent.set_remote_gathering_done();
                session.events().invoke(REMOTE_GATHERING_DONE, NO_ID, NO_VALUE);
            },
            Err(e) => {
                tracing::warn!("undecodable signaling payload: {e}");
            },
        }
    }
}

/// An established ICE session.
///
/// After construction the peers are directly connected:
/// [`IceSession::send_packet_p2p`] bypasses the broker entirely.
pub struct IceSession {
    plink: PeerLinkerSession,
    agent: Arc<dyn IceAgent>,
}

impl std::fmt::Debug for IceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceSession").finish_non_exhaustive()
    }
}

async fn send_signaling(core: &Arc<SessionCore>, message: &IceMessage) -> bool {
    match message.encode() {
        Ok(body) => core.send_reply(PlinkKind::Payload.to_u16(), 0, body).await,
        Err(e) => {
            tracing::warn!("failed to encode signaling message: {e}");
            false
        },
    }
}

impl IceSession {
    /// Link through the Peer-Linker, exchange descriptions and candidates,
    /// and wait for direct connectivity.
    pub async fn start(
        params: IceSessionParams,
        factory: &dyn IceAgentFactory,
        auth: impl Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
        on_packet: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Result<Self, IceError> {
        let controlling = params.target_pad_name.is_some();
        let hooks = Arc::new(IceHooks { agent: AgentSlot::default(), auth: Box::new(auth) });

        let plink = PeerLinkerSession::start(
            PeerLinkerParams {
                peer_linker: params.peer_linker,
                pad_name: params.pad_name,
                peer: params.target_pad_name.map(|pad_name| PeerInfo {
                    pad_name,
                    secret: params.link_secret,
                }),
                user_certificate: params.user_certificate,
            },
            Arc::clone(&hooks) as Arc<dyn PeerLinkerHooks>,
        )
        .await
        .map_err(IceError::Signaling)?;
        let core = Arc::clone(plink.core());

        let (event_tx, mut event_rx) = mpsc::channel(64);
        let config = IceConfig {
            stun_server: params.stun_server,
            turn_server: params.turn_server,
            local_port_range: (!controlling).then_some(CONTROLLED_PORT_RANGE),
            controlling,
        };
        let agent = factory.create(&config, event_tx)?;
        hooks.agent.set(Arc::clone(&agent));

        // pump agent events: trickle candidates out, surface connectivity
        // and inbound packets
        let event_core = Arc::clone(&core);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    IceAgentEvent::Candidate(sdp) => {
                        tracing::debug!("new local candidate");
                        send_signaling(&event_core, &IceMessage::Candidate(sdp)).await;
                    },
                    IceAgentEvent::GatheringDone => {
                        tracing::debug!("local gathering done");
                        send_signaling(&event_core, &IceMessage::GatheringDone).await;
                    },
                    IceAgentEvent::ConnectedChanged(true) => {
                        event_core.events().invoke(CONNECTED, NO_ID, 1);
                    },
                    IceAgentEvent::ConnectedChanged(false) => {
                        tracing::warn!("ICE connectivity lost");
                        event_core.stop();
                    },
                    IceAgentEvent::PacketReceived(data) => on_packet(&data),
                }
            }
        });

        // description exchange: the controlling side offers first, the
        // controlled side answers only after applying the remote offer
        if controlling {
            let sdp = agent.local_description()?;
            if !send_signaling(&core, &IceMessage::SessionDescription(sdp)).await {
                return Err(IceError::Disconnected);
            }
            if core.events().wait_for(SDP_SET, NO_ID).await.is_none() {
                return Err(IceError::Disconnected);
            }
        } else {
            if core.events().wait_for(SDP_SET, NO_ID).await.is_none() {
                return Err(IceError::Disconnected);
            }
            let sdp = agent.local_description()?;
            if !send_signaling(&core, &IceMessage::SessionDescription(sdp)).await {
                return Err(IceError::Disconnected);
            }
        }

        agent.gather_candidates();
        if params.wait_remote_gathering
            && core.events().wait_for(REMOTE_GATHERING_DONE, NO_ID).await.is_none()
        {
            return Err(IceError::Disconnected);
        }

        match core.events().wait_for(CONNECTED, NO_ID).await {
            Some(1) => {},
            _ => return Err(IceError::ConnectFailed),
        }
        tracing::info!("ICE connected");

        Ok(Self { plink, agent })
    }

    /// Send a datagram directly to the peer.
    pub fn send_packet_p2p(&self, payload: &[u8]) -> SendPacketResult {
        self.agent.send(payload)
    }

    /// Relay bytes through the broker instead of the direct path.
    pub async fn send_packet_relayed(&self, payload: &[u8]) -> bool {
        self.plink.send(payload).await
    }

    /// Whether the signaling session is still live.
    pub fn is_connected(&self) -> bool {
        self.plink.is_connected()
    }

    /// Stop the signaling session (idempotent). The agent is dropped with
    /// the session.
    pub fn stop(&self) {
        self.plink.stop();
    }

    /// Wait until the signaling session has stopped.
    pub async fn closed(&self) {
        self.plink.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullAgent;

    impl IceAgent for NullAgent {
        fn local_description(&self) -> Result<String, IceError> {
            Ok("sdp".to_owned())
        }
        fn set_remote_description(&self, _sdp: &str) -> Result<(), IceError> {
            Ok(())
        }
        fn add_remote_candidate(&self, _sdp: &str) -> Result<(), IceError> {
            Ok(())
        }
        fn gather_candidates(&self) {}
        fn send(&self, _payload: &[u8]) -> SendPacketResult {
            SendPacketResult::Success
        }
    }

    #[tokio::test]
    async fn agent_slot_rendezvous() {
        let slot = Arc::new(AgentSlot::default());
        let slot2 = Arc::clone(&slot);
        let waiter = tokio::spawn(async move { slot2.wait().await.local_description() });
        tokio::task::yield_now().await;
        slot.set(Arc::new(NullAgent));
        assert_eq!(waiter.await.unwrap().unwrap(), "sdp");
    }

    #[tokio::test]
    async fn agent_slot_returns_immediately_when_set() {
        let slot = AgentSlot::default();
        slot.set(Arc::new(NullAgent));
        let agent = slot.wait().await;
        assert_eq!(agent.send(b"x"), SendPacketResult::Success);
    }
}
