//! Gossip verification core for QR-coded sensing events.
//!
//! Propagates physical-world observation claims across a network of
//! untrusted relays and lets every receiving node independently verify
//! provenance and compute a numeric confidence that an event is genuine.
//!
//! # Architecture
//!
//! Raw packets arrive from the transport through [`Node::ingest`]. The chain
//! verifier discards anything whose signature chain does not validate, then
//! fans out to two independent consumers:
//!
//! 1. The grouping engine buckets packets by the identity of their root
//!    broadcast and flushes each bucket after a quiet window with no new
//!    arrivals. Flushed groups are scored (depth-decayed, gated on local
//!    sensing corroboration), provisionally-insufficient scores are retried
//!    on a bounded schedule, and accepted groups are delivered exactly once
//!    through the observation callback.
//! 2. The rebroadcast engine decides, per packet, whether this node can
//!    personally vouch for the claim — and if so signs and publishes a
//!    corroborating rebroadcast of its own.
//!
//! # Boundaries
//!
//! Transport, sensor ingestion, and key provisioning are external
//! collaborators: the transport delivers typed [`SignedPacket`]s to
//! [`Node::ingest`] and receives outbound packets through
//! [`PacketPublisher`]; the local sensor reports observations into the
//! [`SensingRegistry`]; the node keypair is loaded elsewhere and handed to
//! [`Node::spawn`].
//!
//! This is a best-effort trust-scoring heuristic, not a Byzantine
//! fault-tolerant consensus protocol: no global ordering, no exactly-once
//! delivery across the network — only local deduplication per node.

pub mod chain;
pub mod config;
pub mod constants;
pub mod dedup;
pub mod error;
pub mod grouping;
pub mod keys;
pub mod packet;
pub mod pipeline;
pub mod rebroadcast;
pub mod retry;
pub mod scoring;
pub mod sensing;

pub use chain::chain_depth;
pub use chain::ChainVerifier;
pub use chain::GroupKey;
pub use config::MessageEncoding;
pub use config::NodeConfig;
pub use config::SignatureAlgorithm;
pub use dedup::DedupTracker;
pub use error::GossipError;
pub use error::Result;
pub use grouping::FlushedGroup;
pub use grouping::GroupingEngine;
pub use keys::NodeKeypair;
pub use keys::PublicKey;
pub use packet::ObjectLocation;
pub use packet::Packet;
pub use packet::PacketSource;
pub use packet::SignedPacket;
pub use pipeline::Node;
pub use pipeline::ObservationCallback;
pub use rebroadcast::PacketPublisher;
pub use rebroadcast::RebroadcastEngine;
pub use retry::retry_bounded;
pub use retry::RetryOutcome;
pub use scoring::score_group;
pub use scoring::ConfidenceScore;
pub use sensing::SensingRegistry;
