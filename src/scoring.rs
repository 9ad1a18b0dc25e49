//! Depth-decayed, freshness-gated confidence scoring.
//!
//! Pure: scores a flushed group against the sensing registry without
//! touching any other state, so any number of concurrent callers are fine.

use tracing::trace;

use crate::chain::chain_depth;
use crate::error::Result;
use crate::packet::SignedPacket;
use crate::sensing::SensingRegistry;

/// Outcome of scoring one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScore {
    /// Sum of per-member contributions, in `[0, ∞)`.
    pub total: f64,
    /// True when at least one member's own source was not freshly sensed.
    ///
    /// Signals "we cannot yet tell whether this corroboration is valid",
    /// not "this corroboration is invalid" — which is what makes a
    /// below-threshold outcome provisional rather than definite.
    pub any_unsensed: bool,
}

impl ConfidenceScore {
    /// Whether this score clears the acceptance threshold.
    pub fn accepts(&self, threshold: f64) -> bool {
        self.total >= threshold
    }
}

/// Score a flushed group.
///
/// Each member — the root itself and every rebroadcast — contributes
/// `1 / depth` when its *own* source (the node/time that produced that hop,
/// not the root) is fresh in the registry, and 0 otherwise. Shallower and
/// locally-corroborated relays count more. Member order never affects the
/// sum.
///
/// # Errors
///
/// Returns `ChainTooDeep` if a member nests beyond the depth cap; callers
/// upstream never hand such members in.
pub fn score_group(
    root: &SignedPacket,
    rebroadcasts: &[SignedPacket],
    registry: &SensingRegistry,
) -> Result<ConfidenceScore> {
    let mut total = 0.0;
    let mut any_unsensed = false;

    for member in std::iter::once(root).chain(rebroadcasts) {
        let depth = chain_depth(member)?;
        let source = member.source();
        if registry.is_fresh(&source.public_key, source.timestamp_ms) {
            total += 1.0 / f64::from(depth);
        } else {
            trace!(member = %member, "member source not freshly sensed");
            any_unsensed = true;
        }
    }

    Ok(ConfidenceScore { total, any_unsensed })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::MessageEncoding;
    use crate::keys::NodeKeypair;
    use crate::packet::Packet;
    use crate::packet::PacketSource;

    fn broadcast(keypair: &NodeKeypair) -> SignedPacket {
        let packet = Packet::Broadcast {
            source: PacketSource::new(keypair.public_key().clone()).unwrap(),
            event: serde_json::json!("sighting"),
        };
        SignedPacket::sign(packet, keypair, MessageEncoding::Utf8).unwrap()
    }

    fn rebroadcast(keypair: &NodeKeypair, original: &SignedPacket) -> SignedPacket {
        let packet = Packet::Rebroadcast {
            source: PacketSource::new(keypair.public_key().clone()).unwrap(),
            location: "dock".into(),
            original: Box::new(original.clone()),
        };
        SignedPacket::sign(packet, keypair, MessageEncoding::Utf8).unwrap()
    }

    fn registry() -> SensingRegistry {
        SensingRegistry::new(Duration::from_secs(60))
    }

    fn sense(registry: &SensingRegistry, packet: &SignedPacket) {
        registry.record(packet.source().public_key.clone(), "dock".into()).unwrap();
    }

    #[test]
    fn test_fresh_root_alone_scores_one() {
        let observer = NodeKeypair::generate();
        let root = broadcast(&observer);
        let registry = registry();
        sense(&registry, &root);

        let score = score_group(&root, &[], &registry).unwrap();
        assert_eq!(score.total, 1.0);
        assert!(!score.any_unsensed);
    }

    #[test]
    fn test_depth_two_members_score_half_each() {
        let observer = NodeKeypair::generate();
        let root = broadcast(&observer);
        let registry = registry();
        sense(&registry, &root);

        let relays: Vec<_> = (0..3)
            .map(|_| {
                let relay = NodeKeypair::generate();
                let packet = rebroadcast(&relay, &root);
                sense(&registry, &packet);
                packet
            })
            .collect();

        let score = score_group(&root, &relays, &registry).unwrap();
        // root 1.0 + three depth-2 corroborations at 0.5 each
        assert_eq!(score.total, 1.0 + 3.0 * 0.5);
        assert!(!score.any_unsensed);
    }

    #[test]
    fn test_unsensed_member_contributes_zero_and_flags_group() {
        let observer = NodeKeypair::generate();
        let relay_fresh = NodeKeypair::generate();
        let relay_stale = NodeKeypair::generate();
        let root = broadcast(&observer);
        let fresh = rebroadcast(&relay_fresh, &root);
        let stale = rebroadcast(&relay_stale, &root);

        let registry = registry();
        sense(&registry, &root);
        sense(&registry, &fresh);
        // relay_stale never sensed

        let score = score_group(&root, &[fresh, stale], &registry).unwrap();
        assert_eq!(score.total, 1.5);
        assert!(score.any_unsensed);
        assert!(!score.accepts(2.0));
        assert!(score.accepts(1.5));
    }

    #[test]
    fn test_member_freshness_uses_its_own_source_not_the_root() {
        let observer = NodeKeypair::generate();
        let relay = NodeKeypair::generate();
        let root = broadcast(&observer);
        let hop = rebroadcast(&relay, &root);

        let registry = registry();
        // Only the relay's key is sensed; the root observer is not.
        sense(&registry, &hop);

        let score = score_group(&root, &[hop], &registry).unwrap();
        assert_eq!(score.total, 0.5);
        assert!(score.any_unsensed);
    }

    #[test]
    fn test_order_does_not_affect_sum() {
        let observer = NodeKeypair::generate();
        let root = broadcast(&observer);
        let registry = registry();
        sense(&registry, &root);

        let a = rebroadcast(&NodeKeypair::generate(), &root);
        let b = rebroadcast(&NodeKeypair::generate(), &root);
        sense(&registry, &a);
        sense(&registry, &b);

        let forward = score_group(&root, &[a.clone(), b.clone()], &registry).unwrap();
        let backward = score_group(&root, &[b, a], &registry).unwrap();
        assert_eq!(forward.total, backward.total);
    }
}
