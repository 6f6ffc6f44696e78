//! Fuzz target for Frame::decode
//!
//! Arbitrary byte sequences must never panic the frame parser: truncated
//! headers, unknown versions, and oversized buffers all return errors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::decode(data);
});
