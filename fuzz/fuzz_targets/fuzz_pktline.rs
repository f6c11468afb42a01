//! Fuzz target for pkt-line decoding and upload-pack negotiation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pear_git::{Negotiation, PktLine};

fuzz_target!(|data: &[u8]| {
    let with_have = data.first().is_some_and(|b| b & 1 == 1);
    let mut negotiation = Negotiation::new(with_have);

    let mut rest = data;
    while let Ok(Some((pkt, used))) = PktLine::decode(rest) {
        assert!(used > 0 && used <= rest.len());
        if negotiation.advance(&pkt).is_err() || negotiation.is_ready() {
            break;
        }
        rest = &rest[used..];
    }
});
