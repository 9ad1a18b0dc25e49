//! Protocol defaults and resource limits.
//!
//! All limits are chosen to keep memory and chain-walk work bounded under
//! adversarial input while supporting realistic sensing workloads. Tunable
//! values have a matching field on [`crate::config::NodeConfig`].

/// Default quiet window for group accumulation, in milliseconds.
///
/// A group's bucket flushes once this long passes with no new arrival for
/// that group. Every arrival resets the deadline.
pub const DEFAULT_QUIET_WINDOW_MS: u64 = 1_500;

/// Default freshness threshold for local sensing entries, in milliseconds.
///
/// A sensing entry corroborates a packet timestamped `T` only while
/// `sensed_at + threshold > T`.
pub const DEFAULT_SENSING_THRESHOLD_MS: u64 = 30_000;

/// Default minimum confidence score required to accept a group.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 1.0;

/// Default number of re-evaluations after a provisional failure.
///
/// The first evaluation is not counted: a group is scored at most
/// `1 + DEFAULT_RETRY_ATTEMPTS` times.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay between provisional re-evaluations, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum accepted rebroadcast chain depth (root = 1).
///
/// Caps the work a single adversarial packet can demand from chain
/// verification. Anything deeper is rejected outright.
pub const MAX_CHAIN_DEPTH: u32 = 32;

/// Maximum simultaneously open group buckets.
///
/// Arrivals for new groups beyond this limit are dropped with a warning
/// rather than growing the bucket table without bound.
pub const MAX_OPEN_GROUPS: usize = 1_024;

/// Maximum packets accumulated in a single group bucket.
pub const MAX_GROUP_MEMBERS: usize = 256;
