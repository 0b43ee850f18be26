//! Peer-Linker broker.
//!
//! Maintains the pad registry and the link-authentication state machine,
//! and relays opaque `Payload` frames between linked pads.
//!
//! # Link authentication
//!
//! A `Link` request is not answered immediately. The broker forwards a
//! `LinkAuth` question to the requestee and records the pending request on
//! the requester's pad (`authenticator` name plus the original request id).
//! The requestee's `LinkAuthResponse` resolves that id with `Success` or
//! `Error` and establishes the symmetric link on acceptance.
//!
//! # Invariants
//!
//! - A session owns at most one pad; pad names are unique.
//! - `linked` is symmetric and exclusive: `a.linked == b` iff
//!   `b.linked == a`.
//! - A linked pad has no pending link request.
//! - Teardown (unregister, unlink, disconnect) always clears both sides of
//!   a link and answers any pending request whose counterpart disappeared.

use std::collections::HashMap;

use padlink_proto::{
    BodyReader, Frame, PlinkKind, ProtocolError, common,
    payloads::plink::{Link, LinkAuth, LinkAuthResponse},
};
use thiserror::Error;

use crate::{
    activation::{ActivationConfig, SessionGate},
    driver::{Broker, SessionAction, SessionEvent},
};

/// Named rejection reasons. The strings are stable API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlinkError {
    /// Command before successful activation.
    #[error("session is not activated")]
    NotActivated,
    /// `RegisterPad` with an empty name.
    #[error("empty pad name")]
    EmptyPadName,
    /// Session already owns a pad.
    #[error("session already has a pad")]
    AlreadyRegistered,
    /// Session owns no pad.
    #[error("session has no pad")]
    NotRegistered,
    /// Pad name is taken.
    #[error("pad with that name already registered")]
    PadFound,
    /// No pad with that name.
    #[error("no such pad registered")]
    PadNotFound,
    /// Pad is already linked.
    #[error("pad already linked")]
    AlreadyLinked,
    /// Pad is not linked.
    #[error("pad not linked")]
    NotLinked,
    /// Pad already has a pending link request.
    #[error("another authentication in progress")]
    AuthInProgress,
    /// No pending link request for that pad.
    #[error("pad not authenticating")]
    AuthNotInProgress,
    /// `LinkAuthResponse` from a pad that is not the pending authenticator.
    #[error("authenticator mismatched")]
    AuthorMismatched,
    /// Malformed frame body.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone)]
struct PendingLink {
    /// Pad that must answer the `LinkAuth` question.
    authenticator: String,
    /// Id of the original `Link` request, answered on resolution.
    request_id: u32,
}

#[derive(Debug)]
struct Pad {
    owner: u64,
    linked: Option<String>,
    pending_link: Option<PendingLink>,
}

#[derive(Debug, Default)]
struct PlinkSession {
    gate: SessionGate,
    pad: Option<String>,
}

/// The Peer-Linker broker state machine.
#[derive(Debug)]
pub struct PeerLinkerDriver {
    activation: ActivationConfig,
    sessions: HashMap<u64, PlinkSession>,
    pads: HashMap<String, Pad>,
}

impl Broker for PeerLinkerDriver {
    fn process_event(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        match event {
            SessionEvent::Accepted { session_id } => {
                self.sessions.insert(session_id, PlinkSession::default());
                tracing::debug!(session_id, "session created");
                Vec::new()
            },
            SessionEvent::FrameReceived { session_id, frame } => {
                self.handle_frame(session_id, &frame)
            },
            SessionEvent::VerifierVerdict { session_id, request_id, ok } => {
                match self.sessions.get_mut(&session_id) {
                    Some(session) => ActivationConfig::handle_verdict(
                        &mut session.gate,
                        session_id,
                        request_id,
                        ok,
                    ),
                    None => Vec::new(),
                }
            },
            SessionEvent::Closed { session_id } => self.free_session(session_id),
        }
    }
}

impl PeerLinkerDriver {
    /// Create a broker with the given activation policy.
    #[must_use]
    pub fn new(activation: ActivationConfig) -> Self {
        Self { activation, sessions: HashMap::new(), pads: HashMap::new() }
    }

    /// Number of registered pads.
    pub fn pad_count(&self) -> usize {
        self.pads.len()
    }

    fn handle_frame(&mut self, session_id: u64, frame: &Frame) -> Vec<SessionAction> {
        if !self.sessions.contains_key(&session_id) {
            tracing::warn!(session_id, "frame from unknown session");
            return Vec::new();
        }

        // results from the client answer nothing; never reply to them
        if frame.kind == common::SUCCESS || frame.kind == common::ERROR {
            tracing::warn!(session_id, "unexpected result packet");
            return Vec::new();
        }

        if frame.kind == common::ACTIVATE_SESSION {
            tracing::info!(session_id, "received activate session");
            let Some(session) = self.sessions.get_mut(&session_id) else {
                return Vec::new();
            };
            return self.activation.handle_activate(&mut session.gate, session_id, frame);
        }

        match self.dispatch(session_id, frame) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(session_id, kind = frame.kind, "request rejected: {e}");
                vec![SessionAction::Send {
                    session_id,
                    frame: Frame::empty(common::ERROR, frame.id),
                }]
            },
        }
    }

    fn dispatch(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, PlinkError> {
        let activated =
            self.sessions.get(&session_id).is_some_and(|session| session.gate.activated);
        if !activated {
            return Err(PlinkError::NotActivated);
        }

        match PlinkKind::from_u16(frame.kind) {
            Some(PlinkKind::RegisterPad) => self.register_pad(session_id, frame),
            Some(PlinkKind::UnregisterPad) => self.unregister_pad(session_id, frame),
            Some(PlinkKind::Link) => self.link(session_id, frame),
            Some(PlinkKind::Unlink) => self.unlink(session_id, frame),
            Some(PlinkKind::LinkAuthResponse) => self.link_auth_response(session_id, frame),
            Some(PlinkKind::Payload) => self.relay_payload(session_id, frame),
            // server-to-client kinds and anything unknown
            _ => Err(ProtocolError::UnknownKind(frame.kind).into()),
        }
    }

    fn own_pad_name(&self, session_id: u64) -> Result<String, PlinkError> {
        self.sessions
            .get(&session_id)
            .and_then(|session| session.pad.clone())
            .ok_or(PlinkError::NotRegistered)
    }

    fn register_pad(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, PlinkError> {
        let name = BodyReader::new(&frame.body).tail_str()?.to_owned();
        tracing::info!(session_id, name, "received pad register request");

        if name.is_empty() {
            return Err(PlinkError::EmptyPadName);
        }
        let session = self.sessions.get_mut(&session_id).ok_or(PlinkError::NotRegistered)?;
        if session.pad.is_some() {
            return Err(PlinkError::AlreadyRegistered);
        }
        if self.pads.contains_key(&name) {
            return Err(PlinkError::PadFound);
        }

        session.pad = Some(name.clone());
        self.pads.insert(name.clone(), Pad { owner: session_id, linked: None, pending_link: None });
        tracing::info!(name, "pad registered");
        Ok(vec![SessionAction::Send {
            session_id,
            frame: Frame::empty(common::SUCCESS, frame.id),
        }])
    }

    fn unregister_pad(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, PlinkError> {
        let pad_name = self.own_pad_name(session_id)?;
        tracing::info!(session_id, pad_name, "unregistering pad");

        let mut actions = Vec::new();
        self.remove_pad(&pad_name, &mut actions);
        actions.push(SessionAction::Send {
            session_id,
            frame: Frame::empty(common::SUCCESS, frame.id),
        });
        Ok(actions)
    }

    fn link(&mut self, session_id: u64, frame: &Frame) -> Result<Vec<SessionAction>, PlinkError> {
        let link = Link::from_frame(frame)?;
        tracing::info!(session_id, requestee = link.requestee, "received pad link request");

        let pad_name = self.own_pad_name(session_id)?;
        let pad = self.pads.get(&pad_name).ok_or(PlinkError::NotRegistered)?;
        if pad.linked.is_some() {
            return Err(PlinkError::AlreadyLinked);
        }
        if pad.pending_link.is_some() {
            return Err(PlinkError::AuthInProgress);
        }
        let requestee = self.pads.get(&link.requestee).ok_or(PlinkError::PadNotFound)?;
        let requestee_owner = requestee.owner;

        tracing::info!(from = pad_name, to = link.requestee, "forwarding auth request");
        let auth = LinkAuth { requester: pad_name.clone(), secret: link.secret }.to_frame()?;
        if let Some(pad) = self.pads.get_mut(&pad_name) {
            pad.pending_link =
                Some(PendingLink { authenticator: link.requestee, request_id: frame.id });
        }
        // the Link request is answered once the authenticator decides
        Ok(vec![SessionAction::Send { session_id: requestee_owner, frame: auth }])
    }

    fn unlink(&mut self, session_id: u64, frame: &Frame) -> Result<Vec<SessionAction>, PlinkError> {
        let pad_name = self.own_pad_name(session_id)?;
        let pad = self.pads.get(&pad_name).ok_or(PlinkError::NotRegistered)?;
        let peer_name = pad.linked.clone().ok_or(PlinkError::NotLinked)?;
        tracing::info!(pad = pad_name, peer = peer_name, "unlinking");

        let mut actions = Vec::new();
        if let Some(peer) = self.pads.get_mut(&peer_name) {
            peer.linked = None;
            actions.push(SessionAction::Send {
                session_id: peer.owner,
                frame: Frame::empty(PlinkKind::Unlinked.to_u16(), 0),
            });
        }
        if let Some(pad) = self.pads.get_mut(&pad_name) {
            pad.linked = None;
        }
        actions.push(SessionAction::Send {
            session_id,
            frame: Frame::empty(common::SUCCESS, frame.id),
        });
        Ok(actions)
    }

    fn link_auth_response(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, PlinkError> {
        let resp = LinkAuthResponse::from_frame(frame)?;
        tracing::info!(session_id, requester = resp.requester, ok = resp.ok, "received link auth");

        let auth_name = self.own_pad_name(session_id)?;
        let requester = self.pads.get(&resp.requester).ok_or(PlinkError::PadNotFound)?;
        let requester_owner = requester.owner;
        let pending = requester.pending_link.clone().ok_or(PlinkError::AuthNotInProgress)?;
        if pending.authenticator != auth_name {
            return Err(PlinkError::AuthorMismatched);
        }

        if let Some(requester) = self.pads.get_mut(&resp.requester) {
            requester.pending_link = None;
        }

        let mut actions = Vec::new();
        if resp.ok {
            // the authenticator may have linked elsewhere while the request
            // was pending; the requester then gets a failure
            let auth_pad = self.pads.get(&auth_name).ok_or(PlinkError::PadNotFound)?;
            if auth_pad.linked.is_some() {
                tracing::warn!(pad = auth_name, "authenticator linked while auth was pending");
                actions.push(SessionAction::Send {
                    session_id: requester_owner,
                    frame: Frame::empty(common::ERROR, pending.request_id),
                });
            } else {
                tracing::info!(a = auth_name, b = resp.requester, "linking pads");
                if let Some(requester) = self.pads.get_mut(&resp.requester) {
                    requester.linked = Some(auth_name.clone());
                }
                if let Some(auth_pad) = self.pads.get_mut(&auth_name) {
                    auth_pad.linked = Some(resp.requester.clone());
                }
                actions.push(SessionAction::Send {
                    session_id: requester_owner,
                    frame: Frame::empty(common::SUCCESS, pending.request_id),
                });
            }
        } else {
            actions.push(SessionAction::Send {
                session_id: requester_owner,
                frame: Frame::empty(common::ERROR, pending.request_id),
            });
        }
        actions.push(SessionAction::Send {
            session_id,
            frame: Frame::empty(common::SUCCESS, frame.id),
        });
        Ok(actions)
    }

    fn relay_payload(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, PlinkError> {
        let pad_name = self.own_pad_name(session_id)?;
        let pad = self.pads.get(&pad_name).ok_or(PlinkError::NotRegistered)?;
        let peer_name = pad.linked.as_ref().ok_or(PlinkError::NotLinked)?;
        let peer = self.pads.get(peer_name).ok_or(PlinkError::PadNotFound)?;

        tracing::trace!(from = pad_name, to = peer_name, bytes = frame.body.len(), "relaying");
        Ok(vec![SessionAction::Send {
            session_id: peer.owner,
            frame: Frame::new(PlinkKind::Payload.to_u16(), 0, frame.body.clone()),
        }])
    }

    /// Remove a pad, notifying its peer and failing any link request that
    /// was waiting on it.
    fn remove_pad(&mut self, name: &str, actions: &mut Vec<SessionAction>) {
        let Some(pad) = self.pads.remove(name) else {
            return;
        };
        if let Some(session) = self.sessions.get_mut(&pad.owner) {
            if session.pad.as_deref() == Some(name) {
                session.pad = None;
            }
        }

        if let Some(peer_name) = pad.linked {
            if let Some(peer) = self.pads.get_mut(&peer_name) {
                peer.linked = None;
                actions.push(SessionAction::Send {
                    session_id: peer.owner,
                    frame: Frame::empty(PlinkKind::Unlinked.to_u16(), 0),
                });
            }
        }

        for other in self.pads.values_mut() {
            if other.pending_link.as_ref().is_some_and(|p| p.authenticator == name) {
                if let Some(pending) = other.pending_link.take() {
                    tracing::warn!(pad = name, "authenticator disappeared with auth pending");
                    actions.push(SessionAction::Send {
                        session_id: other.owner,
                        frame: Frame::empty(common::ERROR, pending.request_id),
                    });
                }
            }
        }
    }

    fn free_session(&mut self, session_id: u64) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if let Some(session) = self.sessions.remove(&session_id) {
            if let Some(pad_name) = session.pad {
                self.remove_pad(&pad_name, &mut actions);
            }
            tracing::debug!(session_id, "session destroyed");
        }
        actions
    }
}
