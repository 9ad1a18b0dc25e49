//! Error types for the gossip verification core.
//!
//! Uses snafu for structured error handling with context.
//!
//! Propagation policy: signature failures are local and silent (an attacker's
//! malformed packet must not crash or stall the pipeline), bucket-composition
//! failures are defensive invariant violations and surfaced loudly, and
//! confidence outcomes are observable only through logs and the absence of a
//! delivery callback.

use snafu::Snafu;

use crate::chain::GroupKey;

/// Errors that can occur while verifying, grouping, and evaluating packets.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GossipError {
    /// A signature somewhere in a rebroadcast chain failed verification.
    #[snafu(display("invalid signature in chain at depth {depth}"))]
    ChainInvalid {
        /// Depth of the hop that failed (root = 1).
        depth: u32,
    },

    /// A chain nests deeper than the accepted maximum.
    #[snafu(display("rebroadcast chain exceeds maximum depth {max}"))]
    ChainTooDeep {
        /// The configured depth cap.
        max: u32,
    },

    /// Public key material could not be decoded.
    #[snafu(display("invalid public key: {reason}"))]
    InvalidKey {
        /// Why decoding failed.
        reason: String,
    },

    /// A flushed bucket contained no broadcast root.
    ///
    /// Reachable at runtime: a straggler rebroadcast arriving after its group
    /// already flushed opens a fresh, rootless bucket. Logged and dropped.
    #[snafu(display("flushed group {group_key} contains no broadcast root"))]
    MissingRoot {
        /// The bucket's group key.
        group_key: GroupKey,
    },

    /// A flushed bucket member resolved to a different root than the bucket.
    ///
    /// Indicates a bug in upstream grouping, not a legitimate runtime outcome.
    #[snafu(display("group {group_key} member resolves to {member_key}"))]
    InconsistentGroup {
        /// The bucket's group key.
        group_key: GroupKey,
        /// The key the offending member resolved to.
        member_key: GroupKey,
    },

    /// A group scored below the acceptance threshold.
    ///
    /// `provisional` is true when at least one member was unsensed, meaning
    /// the local registry may simply not have caught up yet.
    #[snafu(display("confidence {score:.3} below threshold {threshold:.3} (provisional: {provisional})"))]
    InsufficientConfidence {
        /// The computed total score.
        score: f64,
        /// The configured acceptance threshold.
        threshold: f64,
        /// Whether any member was unsensed (retryable).
        provisional: bool,
    },

    /// Canonical serialization of a packet failed.
    #[snafu(display("packet serialization failed: {source}"))]
    Serialize {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The system clock reports a time before the Unix epoch.
    #[snafu(display("system time before Unix epoch"))]
    Clock,

    /// The transport rejected a publish.
    ///
    /// Recoverable: the affected operation is abandoned, other in-flight
    /// groups are unaffected.
    #[snafu(display("transport publish failed: {message}"))]
    Transport {
        /// Description from the transport collaborator.
        message: String,
    },

    /// The node is shutting down and no longer accepts packets.
    #[snafu(display("node is shutting down"))]
    ShuttingDown,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, GossipError>;
