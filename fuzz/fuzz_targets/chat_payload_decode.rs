//! Fuzz target for the CBOR chat envelope.
//!
//! Hostile CBOR must never panic the decoder or allocate without bound;
//! anything that is not a valid versioned envelope returns an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_proto::chat::ChatEnvelope;

fuzz_target!(|data: &[u8]| {
    let _ = ChatEnvelope::decode(data);
});
