//! Client session base.
//!
//! A [`Session`] owns a transport, an [`EventRegistry`], a monotonically
//! increasing packet id, and a background pump that dispatches received
//! frames: `Success`/`Error` results resolve the `(RESULT, id)` rendezvous,
//! everything else goes to the protocol handler.
//!
//! Stopping is idempotent: the first `stop` drains the registry (waking all
//! awaiters with the drained sentinel), closes the transport and fires the
//! disconnect hook. Transport closure triggers the same path from the pump.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use padlink_proto::{Frame, ProtocolError, common};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::{
    events::EventRegistry,
    transport::{self, Connected, ServerLocation, TransportError, TransportHandle},
};

/// Event kind for request results. Protocol layers number their own kinds
/// from 1 upwards.
pub const RESULT: u32 = 0;

/// Errors from session setup.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be established.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Protocol hook invoked by the session pump.
///
/// `on_frame` runs on the pump task, so frames of one session are handled
/// in receipt order. Handlers must not call [`SessionCore::send_request`]
/// (its response arrives through this same pump); use
/// [`SessionCore::send_detached`] instead.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Handle a frame that is not a `Success`/`Error` result.
    ///
    /// Return `false` to report the frame as unhandled; the session then
    /// replies with an `Error` carrying the frame's id.
    async fn on_frame(&self, session: &Arc<SessionCore>, frame: &Frame) -> bool;
}

type DisconnectHook = Box<dyn FnOnce() + Send>;

/// Shared state of one client session.
pub struct SessionCore {
    outbound: mpsc::Sender<Frame>,
    events: EventRegistry,
    next_packet_id: AtomicU32,
    transport: TransportHandle,
    closed: watch::Sender<bool>,
    on_disconnected: Mutex<Option<DisconnectHook>>,
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore").field("events", &self.events).finish_non_exhaustive()
    }
}

impl SessionCore {
    /// The session's event registry.
    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// Whether the session is still live (not drained).
    pub fn is_connected(&self) -> bool {
        !self.events.is_drained()
    }

    /// Allocate the next packet id (starts at 1; 0 is the notification id).
    pub fn allocate_packet_id(&self) -> u32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Install a hook fired once when the session stops.
    pub fn set_on_disconnected(&self, hook: impl FnOnce() + Send + 'static) {
        let mut slot = self.on_disconnected.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(hook));
    }

    /// Send a pre-built frame without waiting for anything.
    pub async fn send_frame(&self, frame: Frame) -> bool {
        if self.events.is_drained() {
            return false;
        }
        self.outbound.send(frame).await.is_ok()
    }

    /// Send a request and block until its `Success`/`Error` result.
    ///
    /// Returns `false` on `Error`, on send failure, and when the session is
    /// drained (before or during the wait).
    pub async fn send_request(&self, kind: u16, body: impl Into<Bytes>) -> bool {
        self.request_with(|id| Ok(Frame::new(kind, id, body.into()))).await
    }

    /// Like [`SessionCore::send_request`] for payloads that need the packet
    /// id while encoding.
    pub async fn request_with(
        &self,
        build: impl FnOnce(u32) -> Result<Frame, ProtocolError>,
    ) -> bool {
        if self.events.is_drained() {
            return false;
        }
        let id = self.allocate_packet_id();
        let frame = match build(id) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("failed to encode request: {e}");
                return false;
            },
        };
        if self.outbound.send(frame).await.is_err() {
            return false;
        }
        matches!(self.events.wait_for(RESULT, id).await, Some(1))
    }

    /// Fire-and-forget request: the result is delivered to `callback`
    /// (1 success, 0 error, drained sentinel on teardown).
    pub async fn send_detached(
        &self,
        build: impl FnOnce(u32) -> Result<Frame, ProtocolError>,
        callback: impl FnOnce(u32) + Send + 'static,
    ) -> bool {
        if self.events.is_drained() {
            return false;
        }
        let id = self.allocate_packet_id();
        let frame = match build(id) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("failed to encode request: {e}");
                return false;
            },
        };
        if !self.events.register_callback(RESULT, id, callback) {
            return false;
        }
        self.outbound.send(frame).await.is_ok()
    }

    /// Send a reply carrying the caller's id; no response is expected.
    pub async fn send_reply(&self, kind: u16, id: u32, body: impl Into<Bytes>) -> bool {
        self.send_frame(Frame::new(kind, id, body.into())).await
    }

    /// Stop the session: drain awaiters, close the transport, fire the
    /// disconnect hook. Idempotent.
    pub fn stop(&self) {
        if !self.events.drain() {
            return;
        }
        self.transport.stop();
        let _ = self.closed.send(true);
        let hook = self.on_disconnected.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// A running client session.
pub struct Session {
    core: Arc<SessionCore>,
    pump: tokio::task::AbortHandle,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("core", &self.core).finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to a broker and start the pump.
    pub async fn start(
        server: &ServerLocation,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Self, SessionError> {
        let connected = transport::connect(server).await?;
        Ok(Self::attach(connected, handler))
    }

    /// Start a session over an already-connected transport.
    pub fn attach(connected: Connected, handler: Arc<dyn SessionHandler>) -> Self {
        let (outbound, inbound, transport) = connected.into_parts();
        let core = Arc::new(SessionCore {
            outbound,
            events: EventRegistry::new(),
            next_packet_id: AtomicU32::new(0),
            transport,
            closed: watch::Sender::new(false),
            on_disconnected: Mutex::new(None),
        });
        let pump = tokio::spawn(pump(Arc::clone(&core), inbound, handler));
        Self { core, pump: pump.abort_handle() }
    }

    /// Shared session state.
    pub fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    /// Stop the session (idempotent).
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Wait until the session has stopped.
    pub async fn closed(&self) {
        let mut rx = self.core.closed.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.core.stop();
        self.pump.abort();
    }
}

async fn pump(
    core: Arc<SessionCore>,
    mut inbound: mpsc::Receiver<Frame>,
    handler: Arc<dyn SessionHandler>,
) {
    while let Some(frame) = inbound.recv().await {
        match frame.kind {
            common::SUCCESS => core.events.invoke(RESULT, frame.id, 1),
            common::ERROR => core.events.invoke(RESULT, frame.id, 0),
            _ => {
                if !handler.on_frame(&core, &frame).await {
                    tracing::warn!(kind = frame.kind, id = frame.id, "unhandled packet");
                    let _ = core.send_reply(common::ERROR, frame.id, Bytes::new()).await;
                }
            },
        }
    }
    core.stop();
}
