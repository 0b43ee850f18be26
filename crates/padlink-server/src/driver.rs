//! Driver event/action types.
//!
//! Both brokers are sans-IO state machines: the runtime feeds
//! [`SessionEvent`]s in and executes the returned [`SessionAction`]s. All
//! events go through one lock per broker, which serializes cross-session
//! effects - an observer never sees a link or a pending request
//! half-established.

use padlink_proto::Frame;

/// Events fed into a broker driver by the runtime.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new connection was accepted.
    Accepted {
        /// Runtime-assigned session id.
        session_id: u64,
    },

    /// A complete frame arrived on a connection.
    FrameReceived {
        /// Session the frame came from.
        session_id: u64,
        /// The frame.
        frame: Frame,
    },

    /// An external certificate verifier finished.
    VerifierVerdict {
        /// Session whose activation is pending.
        session_id: u64,
        /// Id of the `ActivateSession` request being answered.
        request_id: u32,
        /// Whether the verifier exited successfully.
        ok: bool,
    },

    /// A connection went away (close, error, or kicked).
    Closed {
        /// Session that disappeared.
        session_id: u64,
    },
}

/// Actions a broker driver asks the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send a frame to a session.
    Send {
        /// Target session.
        session_id: u64,
        /// Frame to send.
        frame: Frame,
    },

    /// Run the configured certificate verifier with `content` as its first
    /// argument; the runtime answers with
    /// [`SessionEvent::VerifierVerdict`].
    SpawnVerifier {
        /// Session whose activation is pending.
        session_id: u64,
        /// Id of the `ActivateSession` request.
        request_id: u32,
        /// Certificate content to verify.
        content: String,
    },

    /// Drop a connection.
    Close {
        /// Session to drop.
        session_id: u64,
    },
}

/// A broker state machine.
pub trait Broker: Send + 'static {
    /// Process one event and return the actions to execute.
    fn process_event(&mut self, event: SessionEvent) -> Vec<SessionAction>;
}
