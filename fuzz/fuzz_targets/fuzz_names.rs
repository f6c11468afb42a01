//! Fuzz target for url, name and object id validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pear_types::{repo_name_from_url, validate_branch_name, validate_repo_name, ObjectId, PearUrl};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(url) = PearUrl::parse(s) {
        assert!(validate_repo_name(url.repo()).is_ok());
        assert_eq!(PearUrl::parse(&url.to_string()).ok(), Some(url));
    }
    let _ = PearUrl::parse_peer(s);
    let _ = repo_name_from_url(s);
    let _ = validate_branch_name(s);

    if let Ok(oid) = ObjectId::parse(s) {
        assert_eq!(oid.as_str().len(), 40);
    }
});
