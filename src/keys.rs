//! Ed25519 node identity and wire-format key material.
//!
//! The scheme is self-certifying, not PKI-backed: every packet carries the
//! public key it claims to be signed with, and verification uses exactly that
//! key. A forger who controls a keypair can sign its own packets but cannot
//! forge a different node's signature.
//!
//! Keys and signatures travel as hex strings inside the JSON wire format.

use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier;
use ed25519_dalek::VerifyingKey;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;

use crate::error::InvalidKeySnafu;
use crate::error::Result;

/// Hex-encoded Ed25519 public key as it travels on the wire.
///
/// Doubles as the identity under which sensing state is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(String);

impl PublicKey {
    /// Wrap an already-hex-encoded key, validating shape.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the string is not 64 hex characters.
    pub fn from_hex(hex_str: impl Into<String>) -> Result<Self> {
        let hex_str = hex_str.into();
        let bytes = hex::decode(&hex_str).ok().filter(|b| b.len() == 32);
        if bytes.is_none() {
            return InvalidKeySnafu {
                reason: format!("expected 64 hex characters, got {}", hex_str.len()),
            }
            .fail();
        }
        Ok(Self(hex_str))
    }

    /// The hex form as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode into a dalek verifying key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the hex does not decode to a valid Ed25519
    /// public key (wrong length or off-curve point).
    pub(crate) fn verifying_key(&self) -> Result<VerifyingKey> {
        let bytes = hex::decode(&self.0).map_err(|e| {
            InvalidKeySnafu {
                reason: e.to_string(),
            }
            .build()
        })?;
        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            InvalidKeySnafu {
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            }
            .build()
        })?;
        VerifyingKey::from_bytes(&array).map_err(|e| {
            InvalidKeySnafu {
                reason: e.to_string(),
            }
            .build()
        })
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded Ed25519 signature (64 bytes) carried alongside a packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketSignature(String);

impl PacketSignature {
    fn from_signature(signature: &Signature) -> Self {
        Self(hex::encode(signature.to_bytes()))
    }

    fn to_signature(&self) -> Option<Signature> {
        let bytes = hex::decode(&self.0).ok()?;
        let array: [u8; 64] = bytes.as_slice().try_into().ok()?;
        Some(Signature::from_bytes(&array))
    }
}

/// A node's signing identity, supplied by an external provisioning
/// collaborator at startup. Never serialized; the private half never leaves
/// this process.
pub struct NodeKeypair {
    signing: SigningKey,
    public: PublicKey,
}

impl NodeKeypair {
    /// Generate a fresh random keypair.
    ///
    /// Intended for provisioning tooling and tests; a deployed node loads
    /// its keypair from the provisioning collaborator instead.
    pub fn generate() -> Self {
        Self::from_secret_bytes(&SigningKey::generate(&mut OsRng).to_bytes())
    }

    /// Build a keypair from the 32-byte Ed25519 secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(secret);
        let public = PublicKey(hex::encode(signing.verifying_key().to_bytes()));
        Self { signing, public }
    }

    /// This node's wire-format public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign a message with the private key.
    pub(crate) fn sign(&self, message: &[u8]) -> PacketSignature {
        PacketSignature::from_signature(&self.signing.sign(message))
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not leak the private half in logs.
        f.debug_struct("NodeKeypair").field("public", &self.public).finish()
    }
}

/// Verify a detached signature against a claimed public key.
///
/// Malformed keys or signatures count as verification failure rather than
/// errors: adversarial input must not distinguish itself from a bad signature.
pub(crate) fn verify_bytes(key: &PublicKey, message: &[u8], signature: &PacketSignature) -> bool {
    let Ok(verifying) = key.verifying_key() else {
        return false;
    };
    let Some(signature) = signature.to_signature() else {
        return false;
    };
    verifying.verify(message, &signature).is_ok()
}
