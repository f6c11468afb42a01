//! Fuzz target for request payloads: JSON bodies, signed headers and ACL records.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pear_auth::{AuthScheme, Authenticator, SignedEvent};
use pear_types::Request;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<pear_acl::AclRecord>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = SignedEvent::from_header(s);
    }

    if let Ok(request) = serde_json::from_slice::<Request>(data) {
        let auth = Authenticator::new(AuthScheme::ExternalSigned);
        let _ = auth.authenticate_at(&[0u8; 32], &request, 1_700_000_000);
    }
});
