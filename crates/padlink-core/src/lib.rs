//! Client session core for the padlink signaling protocols.
//!
//! Protocol-independent machinery shared by every padlink client: the
//! [`EventRegistry`] rendezvous table, the TCP [`transport`], and the
//! [`Session`] base that pumps frames, correlates results by packet id and
//! hands everything else to a protocol [`SessionHandler`].

#![forbid(unsafe_code)]

pub mod events;
pub mod session;
pub mod transport;

pub use events::{DRAINED_VALUE, EventRegistry, MAX_QUEUED_EVENTS, NO_ID, NO_VALUE};
pub use session::{RESULT, Session, SessionCore, SessionError, SessionHandler};
pub use transport::{Connected, ServerLocation, TransportError, TransportHandle};
