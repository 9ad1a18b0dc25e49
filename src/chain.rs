//! Chain-of-custody verification and group identity.
//!
//! A rebroadcast chain is verified hop by hop against each hop's claimed
//! public key. Resolution walks the nested `original` packets iteratively
//! (no recursion, so adversarial nesting cannot blow the stack) down to the
//! root broadcast, and the group key is derived from that root alone: a
//! broadcast and every rebroadcast chain wrapping it share one key.

use snafu::ResultExt;
use tracing::trace;

use crate::config::MessageEncoding;
use crate::constants::MAX_CHAIN_DEPTH;
use crate::error::ChainInvalidSnafu;
use crate::error::ChainTooDeepSnafu;
use crate::error::Result;
use crate::error::SerializeSnafu;
use crate::packet::Packet;
use crate::packet::SignedPacket;

/// Identifier shared by a root broadcast and all of its rebroadcasts.
///
/// Blake3 digest over the root's type tag and canonical source JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey([u8; 32]);

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 bytes are plenty to identify a group in logs.
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Verifies signature chains and resolves packets to their root identity.
///
/// Pure and stateless; safe to copy freely across tasks.
#[derive(Debug, Clone, Copy)]
pub struct ChainVerifier {
    encoding: MessageEncoding,
}

impl ChainVerifier {
    /// Build a verifier using the configured message encoding.
    pub fn new(encoding: MessageEncoding) -> Self {
        Self { encoding }
    }

    /// Verify a single packet's signature against its claimed public key.
    pub fn verify(&self, packet: &SignedPacket) -> bool {
        packet.verify(self.encoding)
    }

    /// Walk the chain down to its root broadcast, verifying every hop.
    ///
    /// # Errors
    ///
    /// - `ChainInvalid` if any hop's signature (at any depth) fails
    /// - `ChainTooDeep` if nesting exceeds [`MAX_CHAIN_DEPTH`]
    pub fn resolve_root<'a>(&self, packet: &'a SignedPacket) -> Result<&'a SignedPacket> {
        let mut current = packet;
        let mut depth = 1u32;
        loop {
            if depth > MAX_CHAIN_DEPTH {
                return ChainTooDeepSnafu { max: MAX_CHAIN_DEPTH }.fail();
            }
            if !self.verify(current) {
                trace!(depth, "signature failed in chain");
                return ChainInvalidSnafu { depth }.fail();
            }
            match &current.packet {
                Packet::Broadcast { .. } => return Ok(current),
                Packet::Rebroadcast { original, .. } => {
                    current = original;
                    depth += 1;
                }
            }
        }
    }

    /// Grouping identifier of the chain's resolved root.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::resolve_root`] when the chain does not verify.
    pub fn group_key(&self, packet: &SignedPacket) -> Result<GroupKey> {
        let root = self.resolve_root(packet)?;
        root_group_key(root)
    }
}

/// Group key of an already-resolved root packet. Does not verify.
fn root_group_key(root: &SignedPacket) -> Result<GroupKey> {
    let source = serde_json::to_vec(root.source()).context(SerializeSnafu)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(root.packet.type_tag().as_bytes());
    hasher.update(&source);
    Ok(GroupKey(hasher.finalize().into()))
}

/// Number of hops from `packet` down to its root broadcast, root = 1.
///
/// Structural only; performs no signature verification.
///
/// # Errors
///
/// Returns `ChainTooDeep` if nesting exceeds [`MAX_CHAIN_DEPTH`].
pub fn chain_depth(packet: &SignedPacket) -> Result<u32> {
    let mut current = packet;
    let mut depth = 1u32;
    loop {
        match &current.packet {
            Packet::Broadcast { .. } => return Ok(depth),
            Packet::Rebroadcast { original, .. } => {
                if depth >= MAX_CHAIN_DEPTH {
                    return ChainTooDeepSnafu { max: MAX_CHAIN_DEPTH }.fail();
                }
                current = original;
                depth += 1;
            }
        }
    }
}
