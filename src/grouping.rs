//! Time-windowed grouping of verified packets.
//!
//! One accumulation bucket per group key. Every arrival appends to its
//! group's bucket and resets that bucket's deadline to now + quiet window;
//! a bucket flushes once the window elapses with no new member. Buckets are
//! independent: one group's deadline never affects another's.
//!
//! A single scan loop drives all deadlines — one timer total rather than one
//! per bucket, so resource usage stays bounded under many concurrent groups.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::chain::ChainVerifier;
use crate::chain::GroupKey;
use crate::constants::MAX_GROUP_MEMBERS;
use crate::constants::MAX_OPEN_GROUPS;
use crate::error::InconsistentGroupSnafu;
use crate::error::MissingRootSnafu;
use crate::error::Result;
use crate::packet::SignedPacket;

/// A flushed, validated bucket: the root claim and its corroborations.
#[derive(Debug, Clone)]
pub struct FlushedGroup {
    /// The group's identifier.
    pub key: GroupKey,
    /// The single root broadcast.
    pub root: SignedPacket,
    /// Rebroadcast members in arrival order.
    pub rebroadcasts: Vec<SignedPacket>,
}

#[derive(Debug)]
struct Bucket {
    members: Vec<SignedPacket>,
    deadline: Instant,
}

/// Accumulates packets per group and tracks flush deadlines.
///
/// Pure bookkeeping; the async loop that drives it is
/// [`grouping_task`]. Kept separate so window behavior is testable without
/// timers.
#[derive(Debug)]
pub struct GroupingEngine {
    quiet_window: Duration,
    buckets: HashMap<GroupKey, Bucket>,
}

impl GroupingEngine {
    /// Create an engine with the given quiet window.
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            buckets: HashMap::new(),
        }
    }

    /// Append a packet to its group's bucket and reset the bucket deadline.
    ///
    /// Opens a fresh bucket on first arrival for a key (including arrivals
    /// after a flush discarded the previous bucket). Arrivals beyond the
    /// open-group or member caps are dropped with a warning.
    pub fn insert(&mut self, key: GroupKey, packet: SignedPacket, now: Instant) {
        if !self.buckets.contains_key(&key) && self.buckets.len() >= MAX_OPEN_GROUPS {
            warn!(group = %key, open = self.buckets.len(), "open group limit reached, dropping packet");
            return;
        }
        let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            members: Vec::new(),
            deadline: now + self.quiet_window,
        });
        if bucket.members.len() >= MAX_GROUP_MEMBERS {
            warn!(group = %key, members = bucket.members.len(), "bucket member limit reached, dropping packet");
            return;
        }
        bucket.members.push(packet);
        bucket.deadline = now + self.quiet_window;
    }

    /// Earliest pending flush deadline across all open buckets.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buckets.values().map(|bucket| bucket.deadline).min()
    }

    /// Remove and return every bucket whose quiet window has elapsed.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(GroupKey, Vec<SignedPacket>)> {
        let expired: Vec<GroupKey> = self
            .buckets
            .iter()
            .filter(|(_, bucket)| bucket.deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.buckets.remove(&key).map(|bucket| (key, bucket.members)))
            .collect()
    }

    /// Number of currently open buckets.
    pub fn open_groups(&self) -> usize {
        self.buckets.len()
    }
}

/// Validate and split a flushed bucket into its root and rebroadcasts.
///
/// Exact duplicate packets (same signature) are removed, every member is
/// checked to resolve to the bucket's own key, and the single broadcast
/// member becomes the root.
///
/// # Errors
///
/// - `MissingRoot` if the bucket holds no broadcast member. Reachable at
///   runtime: a duplicate rebroadcast arriving after its group already
///   flushed opens a fresh bucket with no root. Logged and dropped.
/// - `InconsistentGroup` if a member resolves to a different root, or a
///   second distinct broadcast is present. Impossible when buckets are
///   keyed by resolved root; indicates a caller bug and is loud.
pub fn split_bucket(
    verifier: &ChainVerifier,
    key: GroupKey,
    mut members: Vec<SignedPacket>,
) -> Result<FlushedGroup> {
    // Duplicate packets carry identical signatures.
    let mut seen = HashSet::new();
    members.retain(|member| seen.insert(member.signature.clone()));

    for member in &members {
        let member_key = verifier.group_key(member)?;
        if member_key != key {
            error!(group = %key, member = %member_key, "bucket member resolves to a different root");
            debug_assert!(false, "inconsistent bucket composition");
            return InconsistentGroupSnafu {
                group_key: key,
                member_key,
            }
            .fail();
        }
    }

    let Some(root_index) = members.iter().position(|member| member.packet.is_broadcast()) else {
        error!(group = %key, members = members.len(), "flushed bucket contains no broadcast root");
        return MissingRootSnafu { group_key: key }.fail();
    };
    let root = members.remove(root_index);

    // After dedup, a surviving second broadcast would be a distinct packet
    // claiming the same root source.
    if let Some(extra) = members.iter().find(|member| member.packet.is_broadcast()) {
        let member_key = verifier.group_key(extra)?;
        error!(group = %key, "flushed bucket contains more than one broadcast");
        debug_assert!(false, "bucket holds multiple distinct broadcasts");
        return InconsistentGroupSnafu {
            group_key: key,
            member_key,
        }
        .fail();
    }

    Ok(FlushedGroup {
        key,
        root,
        rebroadcasts: members,
    })
}

/// Drive the windowing engine: accumulate arrivals, flush expired buckets.
///
/// Consumes `(key, packet)` pairs that already passed chain verification and
/// emits [`FlushedGroup`]s. Exits when cancelled or when the inbound channel
/// closes; open buckets are abandoned at shutdown, never double-delivered.
pub(crate) async fn grouping_task(
    verifier: ChainVerifier,
    quiet_window: Duration,
    mut arrivals: mpsc::UnboundedReceiver<(GroupKey, SignedPacket)>,
    flushes: mpsc::UnboundedSender<FlushedGroup>,
    cancel: CancellationToken,
) {
    let mut engine = GroupingEngine::new(quiet_window);
    info!(quiet_window_ms = quiet_window.as_millis() as u64, "grouping engine started");

    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            arrival = arrivals.recv() => {
                match arrival {
                    Some((key, packet)) => {
                        debug!(group = %key, packet = %packet, "accumulating");
                        engine.insert(key, packet, Instant::now());
                    }
                    None => {
                        info!("grouping engine exiting: ingest channel closed");
                        break;
                    }
                }
            }
            () = sleep_until_or_forever(deadline) => {
                for (key, members) in engine.take_expired(Instant::now()) {
                    debug!(group = %key, members = members.len(), "quiet window elapsed, flushing");
                    match split_bucket(&verifier, key, members) {
                        Ok(group) => {
                            if flushes.send(group).is_err() {
                                info!("grouping engine exiting: flush consumer gone");
                                return;
                            }
                        }
                        // Logged in split_bucket; nothing to deliver.
                        Err(_) => {}
                    }
                }
            }
            () = cancel.cancelled() => {
                info!(open = engine.open_groups(), "grouping engine cancelled, abandoning open buckets");
                break;
            }
        }
    }
}

/// Sleep until the deadline, or forever when no bucket is open.
async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
