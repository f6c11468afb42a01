//! Signed HTTP-auth style events (kind 27235).
//!
//! An event binds a request's url, method and payload hash to a secp256k1
//! key with a BIP-340 schnorr signature over the event id. A `body` tag
//! hashes the whole request body, so operands such as ACL grants and drive
//! offsets are signed too, and a random `nonce` tag keeps ids of identical
//! requests distinct. The event is carried base64 encoded in the request
//! header.

use crate::{AuthError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use nostr::nips::nip19::{FromBech32, ToBech32};
use pear_types::RequestBody;
use secp256k1::{schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Event kind used for request authentication.
pub const HTTP_AUTH_KIND: u16 = 27235;

/// Largest accepted distance between `created_at` and the verifier's clock.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

/// Secret key used to sign request events.
pub struct EventSigner {
    keypair: Keypair,
}

impl EventSigner {
    /// Generates a fresh random signer.
    pub fn generate() -> Self {
        loop {
            let bytes = Zeroizing::new(rand::random::<[u8; 32]>());
            if let Ok(signer) = Self::from_secret_bytes(&*bytes) {
                return signer;
            }
        }
    }

    /// Creates a signer from 32 secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, bytes)
            .map_err(|e| AuthError::Config(format!("invalid secret key: {}", e)))?;
        Ok(Self { keypair })
    }

    /// Parses a secret given as bech32 `nsec1...` or 64 hex characters.
    pub fn from_secret_str(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        if secret.starts_with("nsec1") {
            let key = nostr::SecretKey::from_bech32(secret)
                .map_err(|e| AuthError::Config(format!("invalid nsec: {}", e)))?;
            let bytes = Zeroizing::new(key.to_secret_bytes());
            Self::from_secret_bytes(&*bytes)
        } else {
            let bytes = Zeroizing::new(
                hex::decode(secret).map_err(|_| AuthError::Config("secret key must be nsec or hex".into()))?,
            );
            Self::from_secret_bytes(&bytes)
        }
    }

    /// Hex encoded x-only public key.
    pub fn public_key_hex(&self) -> String {
        let (xonly, _parity) = self.keypair.x_only_public_key();
        hex::encode(xonly.serialize())
    }

    /// Bech32 `npub` of the public key.
    pub fn npub(&self) -> Result<String> {
        npub_from_hex(&self.public_key_hex())
    }

    fn sign_digest(&self, digest: [u8; 32]) -> String {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(digest);
        secp.sign_schnorr_no_aux_rand(&message, &self.keypair).to_string()
    }
}

impl std::fmt::Debug for EventSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSigner")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// A signed request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    /// Hex sha256 of the canonical serialization.
    pub id: String,
    /// Hex x-only public key of the signer.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    /// Event kind, always [`HTTP_AUTH_KIND`].
    pub kind: u16,
    /// `u`, `method`, `body`, `nonce` and optional `payload` tags.
    pub tags: Vec<Vec<String>>,
    /// Always empty.
    pub content: String,
    /// Hex schnorr signature over `id`.
    pub sig: String,
}

impl SignedEvent {
    /// Signs an event for `body` at `created_at`.
    pub fn for_request(signer: &EventSigner, body: &RequestBody, created_at: u64) -> Self {
        let mut tags = vec![
            vec!["u".to_string(), body.url.clone()],
            vec!["method".to_string(), body.method.clone()],
        ];
        if let Some(data) = &body.data {
            tags.push(vec!["payload".to_string(), payload_hash(data)]);
        }
        tags.push(vec!["body".to_string(), body_hash(body)]);
        tags.push(vec!["nonce".to_string(), hex::encode(rand::random::<[u8; 16]>())]);

        let pubkey = signer.public_key_hex();
        let id = event_id(&pubkey, created_at, HTTP_AUTH_KIND, &tags, "");
        let sig = signer.sign_digest(id);

        Self {
            id: hex::encode(id),
            pubkey,
            created_at,
            kind: HTTP_AUTH_KIND,
            tags,
            content: String::new(),
            sig,
        }
    }

    /// Base64 header value.
    pub fn to_header(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AuthError::Config(format!("cannot encode event: {}", e)))?;
        Ok(STANDARD.encode(json))
    }

    /// Decodes a header produced by [`SignedEvent::to_header`].
    pub fn from_header(header: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(header.trim())
            .map_err(|e| AuthError::InvalidEvent(format!("bad base64: {}", e)))?;
        serde_json::from_slice(&raw).map_err(|e| AuthError::InvalidEvent(format!("bad json: {}", e)))
    }

    fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// Checks the event against the request it claims to authorize.
    pub fn verify(&self, body: &RequestBody, now: u64) -> Result<()> {
        if self.kind != HTTP_AUTH_KIND {
            return Err(AuthError::InvalidEvent(format!("wrong kind {}", self.kind)));
        }
        if now.abs_diff(self.created_at) > MAX_CLOCK_SKEW_SECS {
            return Err(AuthError::InvalidEvent("stale timestamp".into()));
        }
        if self.tag("u") != Some(body.url.as_str()) {
            return Err(AuthError::InvalidEvent("url mismatch".into()));
        }
        if self.tag("method") != Some(body.method.as_str()) {
            return Err(AuthError::InvalidEvent("method mismatch".into()));
        }
        if let Some(data) = &body.data {
            if self.tag("payload") != Some(payload_hash(data).as_str()) {
                return Err(AuthError::InvalidEvent("payload mismatch".into()));
            }
        }
        if self.tag("body") != Some(body_hash(body).as_str()) {
            return Err(AuthError::InvalidEvent("body mismatch".into()));
        }

        let id = event_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        if !self.id.eq_ignore_ascii_case(&hex::encode(id)) {
            return Err(AuthError::InvalidEvent("id mismatch".into()));
        }

        let pubkey_bytes =
            hex::decode(&self.pubkey).map_err(|_| AuthError::InvalidEvent("bad pubkey".into()))?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|_| AuthError::InvalidEvent("bad pubkey".into()))?;
        let sig_bytes = hex::decode(&self.sig).map_err(|_| AuthError::InvalidEvent("bad signature".into()))?;
        let signature = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|_| AuthError::InvalidEvent("bad signature".into()))?;

        let secp = Secp256k1::verification_only();
        secp.verify_schnorr(&signature, &Message::from_digest(id), &pubkey)
            .map_err(|_| AuthError::InvalidEvent("signature check failed".into()))
    }

    /// Bech32 `npub` of the signer.
    pub fn npub(&self) -> Result<String> {
        npub_from_hex(&self.pubkey)
    }
}

fn event_id(pubkey: &str, created_at: u64, kind: u16, tags: &[Vec<String>], content: &str) -> [u8; 32] {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]).to_string();
    Sha256::digest(canonical.as_bytes()).into()
}

/// Hex sha256 of the JSON encoding of `data`.
pub fn payload_hash(data: &str) -> String {
    let encoded = serde_json::Value::String(data.to_string()).to_string();
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

/// Hex sha256 of the JSON encoding of the whole request body.
pub fn body_hash(body: &RequestBody) -> String {
    let encoded = serde_json::to_vec(body).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

/// Re-encodes a hex x-only public key as a bech32 `npub`.
pub fn npub_from_hex(pubkey: &str) -> Result<String> {
    let bytes = hex::decode(pubkey).map_err(|_| AuthError::InvalidEvent("bad pubkey".into()))?;
    let key = nostr::PublicKey::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidEvent(format!("bad pubkey: {}", e)))?;
    key.to_bech32()
        .map_err(|e| AuthError::InvalidEvent(format!("cannot encode npub: {}", e)))
}

/// Decodes a bech32 `npub` to its hex public key.
pub fn hex_from_npub(npub: &str) -> Result<String> {
    let key = nostr::PublicKey::from_bech32(npub)
        .map_err(|e| AuthError::InvalidEvent(format!("bad npub: {}", e)))?;
    Ok(hex::encode(key.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn body() -> RequestBody {
        RequestBody::new("pear://abc/foo", "push").with_data("master#0123")
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = EventSigner::generate();
        let event = SignedEvent::for_request(&signer, &body(), NOW);
        assert_eq!(event.kind, HTTP_AUTH_KIND);
        assert!(event.verify(&body(), NOW + 5).is_ok());
    }

    #[test]
    fn test_header_round_trip() {
        let signer = EventSigner::generate();
        let event = SignedEvent::for_request(&signer, &body(), NOW);
        let header = event.to_header().unwrap();
        assert_eq!(SignedEvent::from_header(&header).unwrap(), event);
    }

    #[test]
    fn test_rejects_mismatched_request() {
        let signer = EventSigner::generate();
        let event = SignedEvent::for_request(&signer, &body(), NOW);

        let other_url = RequestBody::new("pear://abc/bar", "push").with_data("master#0123");
        assert!(event.verify(&other_url, NOW).is_err());

        let other_method = RequestBody::new("pear://abc/foo", "f-push").with_data("master#0123");
        assert!(event.verify(&other_method, NOW).is_err());

        let other_data = RequestBody::new("pear://abc/foo", "push").with_data("dev#0123");
        assert!(event.verify(&other_data, NOW).is_err());
    }

    #[test]
    fn test_operands_are_signed() {
        let signer = EventSigner::generate();
        let grant = RequestBody::new("pear://abc/foo", "add-acl").with_name("bob:viewer");
        let event = SignedEvent::for_request(&signer, &grant, NOW);
        assert!(event.verify(&grant, NOW).is_ok());

        let escalated = grant.clone().with_name("mallory:admin");
        assert!(event.verify(&escalated, NOW).is_err());

        let as_branch = grant.clone().for_branch(true);
        assert!(event.verify(&as_branch, NOW).is_err());

        let read = RequestBody::new("pear://abc/foo", "drive-read")
            .with_name("drivekey")
            .with_data("packs/a.pack");
        let event = SignedEvent::for_request(&signer, &read, NOW);
        assert!(event.verify(&read.clone().with_offset(0), NOW).is_err());

        let added_data = grant.with_data("x");
        let event = SignedEvent::for_request(&signer, &RequestBody::new("pear://abc/foo", "add-acl"), NOW);
        assert!(event.verify(&added_data, NOW).is_err());
    }

    #[test]
    fn test_identical_requests_get_distinct_ids() {
        let signer = EventSigner::generate();
        let one = SignedEvent::for_request(&signer, &body(), NOW);
        let two = SignedEvent::for_request(&signer, &body(), NOW);
        assert_ne!(one.id, two.id);
        assert!(two.verify(&body(), NOW).is_ok());
    }

    #[test]
    fn test_rejects_stale_event() {
        let signer = EventSigner::generate();
        let event = SignedEvent::for_request(&signer, &body(), NOW);
        assert!(event.verify(&body(), NOW + MAX_CLOCK_SKEW_SECS + 1).is_err());
        assert!(event.verify(&body(), NOW - MAX_CLOCK_SKEW_SECS - 1).is_err());
    }

    #[test]
    fn test_rejects_tampered_event() {
        let signer = EventSigner::generate();
        let mut event = SignedEvent::for_request(&signer, &body(), NOW);
        event.created_at += 1;
        assert!(event.verify(&body(), NOW).is_err());

        let mut forged = SignedEvent::for_request(&signer, &body(), NOW);
        forged.pubkey = EventSigner::generate().public_key_hex();
        assert!(forged.verify(&body(), NOW).is_err());
    }

    #[test]
    fn test_garbage_header() {
        assert!(SignedEvent::from_header("!!!").is_err());
        assert!(SignedEvent::from_header(&STANDARD.encode(b"{}")).is_err());
    }

    #[test]
    fn test_npub_round_trip() {
        let signer = EventSigner::generate();
        let npub = signer.npub().unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(hex_from_npub(&npub).unwrap(), signer.public_key_hex());
    }

    #[test]
    fn test_secret_from_hex_and_nsec() {
        let hex_secret = "0000000000000000000000000000000000000000000000000000000000000003";
        let signer = EventSigner::from_secret_str(hex_secret).unwrap();
        let nsec = nostr::SecretKey::from_slice(&hex::decode(hex_secret).unwrap())
            .unwrap()
            .to_bech32()
            .unwrap();
        let from_nsec = EventSigner::from_secret_str(&nsec).unwrap();
        assert_eq!(signer.public_key_hex(), from_nsec.public_key_hex());
        assert!(EventSigner::from_secret_str("not a key").is_err());
    }

    #[test]
    fn test_payload_hash_is_json_string_hash() {
        let expected = hex::encode(Sha256::digest(b"\"master#0123\""));
        assert_eq!(payload_hash("master#0123"), expected);
    }

    proptest::proptest! {
        #[test]
        fn prop_changed_operands_fail_verification(
            name in "[a-z]{1,8}:(viewer|contributor|admin)",
            other in "[a-z]{1,8}:(viewer|contributor|admin)",
            offset in proptest::option::of(0u64..1 << 20),
        ) {
            let signer = EventSigner::generate();
            let signed = RequestBody {
                name: Some(name.clone()),
                offset,
                ..RequestBody::new("pear://abc/foo", "add-acl")
            };
            let event = SignedEvent::for_request(&signer, &signed, NOW);
            proptest::prop_assert!(event.verify(&signed, NOW).is_ok());

            let swapped = RequestBody { name: Some(other.clone()), ..signed.clone() };
            proptest::prop_assert_eq!(event.verify(&swapped, NOW).is_ok(), other == name);

            let moved = RequestBody { offset: Some(offset.map_or(0, |o| o + 1)), ..signed };
            proptest::prop_assert!(event.verify(&moved, NOW).is_err());
        }
    }
}
