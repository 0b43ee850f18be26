//! Message kind numbering.
//!
//! The two brokers speak separate protocols on separate ports, each with its
//! own kind space. Both share a common prefix so session activation and
//! result handling are protocol-independent. Numeric values are not stable
//! across protocol versions; only the names are.

/// Kinds shared by every broker protocol.
pub mod common {
    /// Positive reply to a client request, carrying the request id.
    pub const SUCCESS: u16 = 0;
    /// Negative reply to a client request, carrying the request id.
    pub const ERROR: u16 = 1;
    /// First request of every session: user certificate for verification.
    pub const ACTIVATE_SESSION: u16 = 2;
}

/// Peer-Linker message kinds.
///
/// Every client-to-server packet is answered with `Success` or `Error`
/// carrying the same id, except `Link` (answered once the authenticator
/// decides) and `Payload` (relayed, unacknowledged). Ids of server-to-client
/// packets other than results must be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PlinkKind {
    /// Positive result.
    Success = common::SUCCESS,
    /// Negative result.
    Error = common::ERROR,
    /// Session activation with user certificate.
    ActivateSession = common::ACTIVATE_SESSION,
    /// Create a pad owned by this session.
    RegisterPad = 3,
    /// Delete this session's pad.
    UnregisterPad = 4,
    /// Ask the broker to link this session's pad to another pad.
    Link = 5,
    /// Tear down an established link.
    Unlink = 6,
    /// Reserved: legacy link notification, no longer emitted.
    LinkSuccess = 7,
    /// Reserved: legacy denial notification, no longer emitted.
    LinkDenied = 8,
    /// Notify a pad that its peer unlinked or disappeared.
    Unlinked = 9,
    /// Ask a pad to authenticate a link requester.
    LinkAuth = 10,
    /// Authenticator's verdict on a pending link request.
    LinkAuthResponse = 11,
    /// Opaque bytes relayed to the linked pad.
    Payload = 12,
}

impl PlinkKind {
    /// Decode from a wire value.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            common::SUCCESS => Self::Success,
            common::ERROR => Self::Error,
            common::ACTIVATE_SESSION => Self::ActivateSession,
            3 => Self::RegisterPad,
            4 => Self::UnregisterPad,
            5 => Self::Link,
            6 => Self::Unlink,
            7 => Self::LinkSuccess,
            8 => Self::LinkDenied,
            9 => Self::Unlinked,
            10 => Self::LinkAuth,
            11 => Self::LinkAuthResponse,
            12 => Self::Payload,
            _ => return None,
        })
    }

    /// Wire value.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// ICE signaling kinds, carried between linked peers as inner frames inside
/// `Payload` bodies. Numbering continues after [`PlinkKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IceKind {
    /// Local session description of the sending peer.
    SessionDescription = 13,
    /// One trickled ICE candidate.
    Candidate = 14,
    /// The sending peer finished gathering candidates.
    GatheringDone = 15,
}

impl IceKind {
    /// Decode from a wire value.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            13 => Self::SessionDescription,
            14 => Self::Candidate,
            15 => Self::GatheringDone,
            _ => return None,
        })
    }

    /// Wire value.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Channel-Hub message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ChubKind {
    /// Positive result.
    Success = common::SUCCESS,
    /// Negative result.
    Error = common::ERROR,
    /// Session activation with user certificate.
    ActivateSession = common::ACTIVATE_SESSION,
    /// Register a channel owned by this (producer) session.
    RegisterChannel = 3,
    /// Remove a channel owned by this session.
    UnregisterChannel = 4,
    /// Ask for the list of registered channels.
    GetChannels = 5,
    /// Reply to `GetChannels`: NUL-separated channel names.
    ChannelList = 6,
    /// Consumer asks for a fresh pad on a channel; forwarded to the
    /// producer with a broker-allocated id.
    PadRequest = 7,
    /// Producer's answer, relayed to the consumer as the reply to its
    /// original `PadRequest`.
    PadRequestResponse = 8,
}

impl ChubKind {
    /// Decode from a wire value.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            common::SUCCESS => Self::Success,
            common::ERROR => Self::Error,
            common::ACTIVATE_SESSION => Self::ActivateSession,
            3 => Self::RegisterChannel,
            4 => Self::UnregisterChannel,
            5 => Self::GetChannels,
            6 => Self::ChannelList,
            7 => Self::PadRequest,
            8 => Self::PadRequestResponse,
            _ => return None,
        })
    }

    /// Wire value.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}
