//! Fuzz target for frame and payload decoding
//!
//! # Strategy
//!
//! - Raw bytes through `Frame::decode`
//! - Decoded frames through every typed payload decoder
//!
//! # Invariants
//!
//! - Decoding NEVER panics on malformed input
//! - A frame that decodes re-encodes to the identical byte string

#![no_main]

use libfuzzer_sys::fuzz_target;
use padlink_proto::{
    Frame,
    payloads::{
        chub::{ChannelList, PadRequestResponse},
        ice::IceMessage,
        plink::{Link, LinkAuth, LinkAuthResponse},
    },
};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    // structural round trip
    let wire = frame.to_bytes().expect("decoded frame must re-encode");
    assert_eq!(&wire[..], data);

    // typed decoders must reject or accept, never panic
    let _ = Link::from_frame(&frame);
    let _ = LinkAuth::from_frame(&frame);
    let _ = LinkAuthResponse::from_frame(&frame);
    let _ = ChannelList::from_frame(&frame);
    let _ = PadRequestResponse::from_frame(&frame);
    let _ = IceMessage::decode(&frame.body);
});
