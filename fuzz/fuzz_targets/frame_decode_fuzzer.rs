//! Fuzz target for the frame codec
//!
//! Every byte string a remote participant or the rendezvous service can send
//! must decode to a value or an error, never a panic.
//!
//! # Invariants
//!
//! - Decoding arbitrary bytes as any frame family NEVER panics
//! - A decoded payload re-encodes to a frame that decodes to the same value
//! - Declared lengths above `MAX_FRAME_SIZE` are rejected before allocation

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{
    decode_body, decode_frame, encode_frame, frame_len, Handshake, Payload, Signal, HEADER_LEN,
    MAX_FRAME_SIZE,
};

fuzz_target!(|data: &[u8]| {
    let _ = decode_frame::<Signal>(data);
    let _ = decode_frame::<Handshake>(data);
    let _ = decode_body::<Signal>(data);

    if let Some(header) = data.first_chunk::<HEADER_LEN>() {
        if let Ok(len) = frame_len(*header) {
            assert!(len <= MAX_FRAME_SIZE);
        }
    }

    if let Ok(payload) = decode_body::<Payload>(data) {
        let frame = encode_frame(&payload).expect("decoded payload must re-encode");
        let again: Payload = decode_frame(&frame).expect("re-encoded payload must decode");
        assert_eq!(payload, again);
    }
});
