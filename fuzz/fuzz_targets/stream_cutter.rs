//! Fuzz target for the stream frame cutter
//!
//! # Strategy
//!
//! - Arbitrary bytes split at arbitrary chunk boundaries
//!
//! # Invariants
//!
//! - Chunking never changes the decoded frame sequence
//! - The cutter never panics and never emits a frame from a stream it
//!   already rejected

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use padlink_proto::{Frame, FrameCutter};

#[derive(Debug, Arbitrary)]
struct Input {
    stream: Vec<u8>,
    chunk: u8,
}

fn drain(cutter: &mut FrameCutter, out: &mut Vec<Frame>) -> bool {
    loop {
        match cutter.next_frame() {
            Ok(Some(frame)) => out.push(frame),
            Ok(None) => return true,
            Err(_) => return false,
        }
    }
}

fuzz_target!(|input: Input| {
    let chunk = usize::from(input.chunk).max(1);

    let mut whole = FrameCutter::new();
    whole.extend(&input.stream);
    let mut expected = Vec::new();
    let whole_ok = drain(&mut whole, &mut expected);

    let mut pieces = FrameCutter::new();
    let mut got = Vec::new();
    let mut pieces_ok = true;
    for piece in input.stream.chunks(chunk) {
        pieces.extend(piece);
        if !drain(&mut pieces, &mut got) {
            pieces_ok = false;
            break;
        }
    }

    if whole_ok && pieces_ok {
        assert_eq!(expected, got);
    }
});
