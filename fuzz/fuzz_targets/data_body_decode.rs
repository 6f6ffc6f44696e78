//! Fuzz target for DATA body decoding, including the decompression path.
//!
//! The compressed flag drives inflate over attacker-controlled bytes;
//! corrupt streams and decompression bombs must error out, never panic or
//! exhaust memory.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_proto::{FrameFlags, data::decode_data_body};

fuzz_target!(|input: (u8, &[u8])| {
    let (flag_byte, body) = input;
    let flags = FrameFlags::from_byte(flag_byte);
    let _ = decode_data_body(body, flags, None);
});
