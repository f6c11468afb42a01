//! Ed25519 node identity used on the transport.

use crate::{P2pError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use zeroize::Zeroizing;

/// A node's transport key pair.
///
/// The hex public key is what appears in `pear://<key>/<repo>` URLs and,
/// without a signed auth scheme, it is also the peer's user id.
pub struct NodeKeypair {
    signing_key: SigningKey,
}

impl NodeKeypair {
    /// Generates a new random keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates a keypair from 32 secret bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not 32 bytes long.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret: Zeroizing<[u8; 32]> = Zeroizing::new(
            bytes.try_into().map_err(|_| P2pError::InvalidSecretKey)?,
        );
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Creates a keypair from a hex encoded secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not 64 hex characters.
    pub fn from_secret_hex(text: &str) -> Result<Self> {
        let bytes = Zeroizing::new(hex::decode(text.trim()).map_err(|_| P2pError::InvalidSecretKey)?);
        Self::from_secret_bytes(&bytes)
    }

    /// Loads the keypair stored at `path`, generating and saving one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, written or parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_secret_hex(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keypair = Self::generate();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, keypair.secret_hex().as_bytes())?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
                }
                tracing::info!(public_key = %keypair.public_hex(), "generated node key");
                Ok(keypair)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Raw public key.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Hex encoded public key.
    #[must_use]
    pub fn public_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Signs a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Hex encoded secret. Handle with care.
    #[must_use]
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing_key.to_bytes()))
    }
}

/// Verifies an ed25519 signature made by `public_key`.
///
/// # Errors
///
/// Returns an error if the key is malformed or the signature does not match.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| P2pError::Handshake(format!("bad public key: {}", e)))?;
    key.verify(message, &Signature::from_bytes(signature))
        .map_err(|_| P2pError::Handshake("bad signature".into()))
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("public_key", &self.public_hex())
            .finish_non_exhaustive()
    }
}

impl Clone for NodeKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_generate() {
        assert_ne!(NodeKeypair::generate().public_key(), NodeKeypair::generate().public_key());
    }

    #[test]
    fn keypair_sign_verify() {
        let kp = NodeKeypair::generate();
        let sig = kp.sign(b"hello");
        assert!(verify(&kp.public_key(), b"hello", &sig).is_ok());
        assert!(verify(&kp.public_key(), b"other", &sig).is_err());
    }

    #[test]
    fn keypair_hex_round_trip() {
        let kp = NodeKeypair::generate();
        let again = NodeKeypair::from_secret_hex(&kp.secret_hex()).unwrap();
        assert_eq!(kp.public_key(), again.public_key());
        assert!(NodeKeypair::from_secret_hex("abcd").is_err());
    }

    #[test]
    fn keypair_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secret");
        let first = NodeKeypair::load_or_create(&path).unwrap();
        let second = NodeKeypair::load_or_create(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn keypair_debug_hides_secret() {
        let kp = NodeKeypair::generate();
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(kp.secret_hex().as_str()));
    }
}
