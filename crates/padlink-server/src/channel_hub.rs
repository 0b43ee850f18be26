//! Channel-Hub broker.
//!
//! Producers register named channels; consumers list them and ask the
//! broker to have the producer mint a fresh pad name. The broker bridges
//! the two with a pending-request table: the consumer's `PadRequest` is
//! forwarded to the producer under a broker-allocated id, and the
//! producer's `PadRequestResponse` is relayed back as the reply to the
//! consumer's original request.
//!
//! Forwarded ids are allocated from the top half of the u32 space so they
//! never collide with the ids producer clients pick for their own
//! requests.

use std::collections::HashMap;

use padlink_proto::{
    BodyReader, ChubKind, Frame, FrameBuilder, ProtocolError, common,
    payloads::chub::{ChannelList, PadRequestResponse},
};
use thiserror::Error;

use crate::{
    activation::{ActivationConfig, SessionGate},
    driver::{Broker, SessionAction, SessionEvent},
};

/// First broker-allocated forward id.
const FORWARD_ID_BASE: u32 = 0x8000_0000;

/// Named rejection reasons. The strings are stable API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChubError {
    /// Command before successful activation.
    #[error("session is not activated")]
    NotActivated,
    /// `RegisterChannel` with an empty name.
    #[error("empty channel name")]
    EmptyChannelName,
    /// Channel name is taken.
    #[error("channel with that name already registered")]
    ChannelFound,
    /// No channel with that name.
    #[error("no such channel registered")]
    ChannelNotFound,
    /// Channel operation from a session that does not own it, or a pad
    /// answer from a session that is not the requestee.
    #[error("channel not registered by the sender")]
    SenderMismatch,
    /// The requesting session already has a pad request in flight.
    #[error("another request in progress")]
    AnotherRequestPending,
    /// `PadRequestResponse` with an id that matches no pending request.
    #[error("requester not found")]
    RequesterNotFound,
    /// Malformed frame body.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug)]
struct Channel {
    name: String,
    owner: u64,
}

#[derive(Debug)]
struct PendingPadRequest {
    requester: u64,
    /// Id of the consumer's original `PadRequest`, answered on resolution.
    requester_request_id: u32,
    requestee: u64,
}

#[derive(Debug, Default)]
struct ChubSession {
    gate: SessionGate,
}

/// The Channel-Hub broker state machine.
#[derive(Debug)]
pub struct ChannelHubDriver {
    activation: ActivationConfig,
    sessions: HashMap<u64, ChubSession>,
    /// Registration order is observable via `GetChannels`.
    channels: Vec<Channel>,
    pending: HashMap<u32, PendingPadRequest>,
    next_forward_id: u32,
}

impl Broker for ChannelHubDriver {
    fn process_event(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        match event {
            SessionEvent::Accepted { session_id } => {
                self.sessions.insert(session_id, ChubSession::default());
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

impl ChannelHubDriver {
    /// Create a broker with the given activation policy.
    #[must_use]
    pub fn new(activation: ActivationConfig) -> Self {
        Self {
            activation,
            sessions: HashMap::new(),
            channels: Vec::new(),
            pending: HashMap::new(),
            next_forward_id: FORWARD_ID_BASE,
        }
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn handle_frame(&mut self, session_id: u64, frame: &Frame) -> Vec<SessionAction> {
        if !self.sessions.contains_key(&session_id) {
            tracing::warn!(session_id, "frame from unknown session");
            return Vec::new();
        }

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
    ) -> Result<Vec<SessionAction>, ChubError> {
        let activated =
            self.sessions.get(&session_id).is_some_and(|session| session.gate.activated);
        if !activated {
            return Err(ChubError::NotActivated);
        }

        match ChubKind::from_u16(frame.kind) {
            Some(ChubKind::RegisterChannel) => self.register_channel(session_id, frame),
            Some(ChubKind::UnregisterChannel) => self.unregister_channel(session_id, frame),
            Some(ChubKind::GetChannels) => self.get_channels(session_id, frame),
            Some(ChubKind::PadRequest) => self.pad_request(session_id, frame),
            Some(ChubKind::PadRequestResponse) => self.pad_request_response(session_id, frame),
            _ => Err(ProtocolError::UnknownKind(frame.kind).into()),
        }
    }

    fn find_channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.name == name)
    }

    fn register_channel(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, ChubError> {
        let name = BodyReader::new(&frame.body).tail_str()?.to_owned();
        tracing::info!(session_id, name, "received channel register request");

        if name.is_empty() {
            return Err(ChubError::EmptyChannelName);
        }
        if self.find_channel(&name).is_some() {
            return Err(ChubError::ChannelFound);
        }

        tracing::info!(name, "channel registered");
        self.channels.push(Channel { name, owner: session_id });
        Ok(vec![SessionAction::Send {
            session_id,
            frame: Frame::empty(common::SUCCESS, frame.id),
        }])
    }

    fn unregister_channel(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, ChubError> {
        let name = BodyReader::new(&frame.body).tail_str()?.to_owned();
        tracing::info!(session_id, name, "received channel unregister request");

        let channel = self.find_channel(&name).ok_or(ChubError::ChannelNotFound)?;
        if channel.owner != session_id {
            return Err(ChubError::SenderMismatch);
        }

        tracing::info!(name, "unregistering channel");
        self.channels.retain(|channel| channel.name != name);
        Ok(vec![SessionAction::Send {
            session_id,
            frame: Frame::empty(common::SUCCESS, frame.id),
        }])
    }

    fn get_channels(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, ChubError> {
        tracing::info!(session_id, "received channel list request");
        let list = ChannelList {
            names: self.channels.iter().map(|channel| channel.name.clone()).collect(),
        };
        Ok(vec![SessionAction::Send { session_id, frame: list.to_frame(frame.id)? }])
    }

    fn pad_request(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, ChubError> {
        let name = BodyReader::new(&frame.body).tail_str()?.to_owned();
        tracing::info!(session_id, channel = name, "received pad request");

        if self.pending.values().any(|pending| pending.requester == session_id) {
            return Err(ChubError::AnotherRequestPending);
        }
        let producer = self.find_channel(&name).ok_or(ChubError::ChannelNotFound)?.owner;

        self.next_forward_id = self.next_forward_id.wrapping_add(1);
        let forward_id = self.next_forward_id;
        let forward =
            FrameBuilder::new(ChubKind::PadRequest.to_u16(), forward_id).str(&name).finish()?;
        self.pending.insert(
            forward_id,
            PendingPadRequest {
                requester: session_id,
                requester_request_id: frame.id,
                requestee: producer,
            },
        );
        // the consumer is answered once the producer decides
        Ok(vec![SessionAction::Send { session_id: producer, frame: forward }])
    }

    fn pad_request_response(
        &mut self,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<SessionAction>, ChubError> {
        let resp = PadRequestResponse::from_frame(frame)?;
        tracing::info!(session_id, ok = resp.ok, pad = resp.pad_name, "received pad response");

        let pending = self.pending.get(&frame.id).ok_or(ChubError::RequesterNotFound)?;
        if pending.requestee != session_id {
            return Err(ChubError::SenderMismatch);
        }
        let Some(pending) = self.pending.remove(&frame.id) else {
            return Err(ChubError::RequesterNotFound);
        };

        Ok(vec![
            SessionAction::Send {
                session_id: pending.requester,
                frame: resp.to_frame(pending.requester_request_id)?,
            },
            SessionAction::Send { session_id, frame: Frame::empty(common::SUCCESS, frame.id) },
        ])
    }

    fn free_session(&mut self, session_id: u64) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.sessions.remove(&session_id).is_none() {
            return actions;
        }

        let owned: Vec<String> = self
            .channels
            .iter()
            .filter(|channel| channel.owner == session_id)
            .map(|channel| channel.name.clone())
            .collect();
        if !owned.is_empty() {
            tracing::debug!(session_id, channels = ?owned, "removing channels of closed session");
            self.channels.retain(|channel| channel.owner != session_id);
        }

        let resolved: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, pending)| {
                pending.requester == session_id || pending.requestee == session_id
            })
            .map(|(id, _)| *id)
            .collect();
        for id in resolved {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            if pending.requestee == session_id {
                // producer disappeared before answering
                tracing::warn!(session_id, "requestee gone, failing pad request");
                match PadRequestResponse::denied().to_frame(pending.requester_request_id) {
                    Ok(frame) => {
                        actions.push(SessionAction::Send { session_id: pending.requester, frame });
                    },
                    Err(e) => tracing::warn!("failed to encode failure reply: {e}"),
                }
            }
            // a vanished requester is dropped silently
        }

        tracing::debug!(session_id, "session destroyed");
        actions
    }
}
