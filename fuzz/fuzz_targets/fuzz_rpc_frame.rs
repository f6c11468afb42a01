//! Fuzz target for RPC frame decoding.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use pear_p2p::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(Bytes::copy_from_slice(data)) {
        let encoded = frame.encode().expect("decoded frame re-encodes");
        let again = Frame::decode(encoded).expect("re-encoded frame decodes");
        assert_eq!(again.id(), frame.id());
    }
});
