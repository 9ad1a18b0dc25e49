//! Packet model: observation claims and their signed envelopes.
//!
//! A `broadcast` packet is a first-hand observation claim and the root of
//! every chain. A `rebroadcast` packet is a relay's claim "I independently
//! corroborated `original`" and owns the entire provenance chain by value,
//! so the full chain travels inside every rebroadcast.
//!
//! Wire format is JSON with an internal `type` tag. Signatures cover the
//! canonical JSON serialization of the unsigned fields; an unrecognized
//! `type` tag fails at deserialization and never reaches the pipeline.
//! Packets are immutable once signed.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use snafu::ResultExt;
use uuid::Uuid;

use crate::config::MessageEncoding;
use crate::error::ClockSnafu;
use crate::error::Result;
use crate::error::SerializeSnafu;
use crate::keys;
use crate::keys::NodeKeypair;
use crate::keys::PacketSignature;
use crate::keys::PublicKey;

/// Identifies who emitted a packet and when.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketSource {
    /// Opaque per-packet identifier.
    pub id: Uuid,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    /// Identity the packet claims to be signed with. Also the key under
    /// which sensing state is looked up.
    #[serde(rename = "publicKey")]
    pub public_key: PublicKey,
}

impl PacketSource {
    /// Fresh source stamp for a packet emitted by `public_key` right now.
    ///
    /// # Errors
    ///
    /// Returns `Clock` if the system time is before the Unix epoch.
    pub fn new(public_key: PublicKey) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            timestamp_ms: now_ms()?,
            public_key,
        })
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> Result<u64> {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| ClockSnafu.build())?;
    Ok(elapsed.as_millis() as u64)
}

/// Physical-location tag a relay attaches when corroborating a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectLocation(pub String);

impl From<&str> for ObjectLocation {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unsigned observation claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    /// Original first-hand observation. Root of every chain.
    Broadcast {
        /// Who observed, and when.
        source: PacketSource,
        /// Opaque application payload describing the observation.
        event: Value,
    },
    /// A relay's signed claim of having corroborated `original`.
    Rebroadcast {
        /// Who corroborated, and when.
        source: PacketSource,
        /// Where this relay sensed the observed object.
        location: ObjectLocation,
        /// The full chain being corroborated, owned by value.
        original: Box<SignedPacket>,
    },
}

impl Packet {
    /// The source stamp of this packet (not of its root).
    pub fn source(&self) -> &PacketSource {
        match self {
            Self::Broadcast { source, .. } | Self::Rebroadcast { source, .. } => source,
        }
    }

    /// Wire-format type tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Broadcast { .. } => "broadcast",
            Self::Rebroadcast { .. } => "rebroadcast",
        }
    }

    /// Whether this is a root broadcast claim.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast { .. })
    }
}

/// A packet plus the signature over its canonical serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPacket {
    /// The unsigned claim.
    #[serde(flatten)]
    pub packet: Packet,
    /// Ed25519 signature by `packet.source().public_key`'s holder.
    pub signature: PacketSignature,
}

impl SignedPacket {
    /// Sign `packet` with this node's private key.
    ///
    /// # Errors
    ///
    /// Returns `Serialize` if canonical serialization fails.
    pub fn sign(packet: Packet, keypair: &NodeKeypair, encoding: MessageEncoding) -> Result<Self> {
        let message = canonical_bytes(&packet, encoding)?;
        let signature = keypair.sign(&message);
        Ok(Self { packet, signature })
    }

    /// Verify this packet's own signature against its claimed public key.
    ///
    /// Single hop only; nested `original` packets are not checked here.
    /// Any malformed material counts as verification failure.
    pub fn verify(&self, encoding: MessageEncoding) -> bool {
        let Ok(message) = canonical_bytes(&self.packet, encoding) else {
            return false;
        };
        keys::verify_bytes(&self.packet.source().public_key, &message, &self.signature)
    }

    /// The source stamp of the outermost packet.
    pub fn source(&self) -> &PacketSource {
        self.packet.source()
    }
}

impl std::fmt::Display for SignedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = self.source();
        write!(
            f,
            "{} {} from {:.8}… at {}",
            self.packet.type_tag(),
            source.id,
            source.public_key.as_str(),
            source.timestamp_ms
        )
    }
}

/// Canonical bytes that get signed: the JSON text of the unsigned packet,
/// passed through the configured encoding.
fn canonical_bytes(packet: &Packet, encoding: MessageEncoding) -> Result<Vec<u8>> {
    let text = serde_json::to_string(packet).context(SerializeSnafu)?;
    Ok(encoding.encode(&text))
}
