//! Fuzz target for the broker state machines
//!
//! # Strategy
//!
//! - Random event sequences (connects, frames with arbitrary kinds and
//!   bodies, disconnects) against both brokers
//!
//! # Invariants
//!
//! - Drivers never panic, whatever the clients send
//! - Every produced action targets a session the driver has seen

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use padlink_server::{
    ActivationConfig, Broker, ChannelHubDriver, PeerLinkerDriver, SessionEvent,
};

#[derive(Debug, Arbitrary)]
enum Step {
    Accept { session: u8 },
    Frame { session: u8, kind: u16, id: u32, body: Vec<u8> },
    Close { session: u8 },
}

impl Step {
    fn into_event(self) -> SessionEvent {
        match self {
            Step::Accept { session } => SessionEvent::Accepted { session_id: session.into() },
            Step::Frame { session, kind, id, body } => SessionEvent::FrameReceived {
                session_id: session.into(),
                frame: padlink_proto::Frame::new(kind, id, body),
            },
            Step::Close { session } => SessionEvent::Closed { session_id: session.into() },
        }
    }
}

fuzz_target!(|steps: Vec<Step>| {
    let mut plink = PeerLinkerDriver::new(ActivationConfig::default());
    let mut chub = ChannelHubDriver::new(ActivationConfig::default());

    for step in steps {
        let event = step.into_event();
        let _ = plink.process_event(event.clone());
        let _ = chub.process_event(event);
    }
});
