//! Node pipeline: verification fan-out, windowed evaluation, delivery.
//!
//! Data flow through the protocol core:
//!
//! ```text
//! transport ─> ingest() ─> chain verification ─┬─> grouping ─> scoring ─> retry ─> dedup ─> callback
//!                                              └─> rebroadcast engine ─> publish()
//! ```
//!
//! Every stage progresses independently; a slow or retrying group never
//! stalls ingestion or unrelated groups. The only shared mutable state is
//! the sensing registry and the dedup tracker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::chain::ChainVerifier;
use crate::chain::GroupKey;
use crate::config::NodeConfig;
use crate::dedup::DedupTracker;
use crate::error::Result;
use crate::error::ShuttingDownSnafu;
use crate::grouping::grouping_task;
use crate::grouping::FlushedGroup;
use crate::keys::NodeKeypair;
use crate::packet::now_ms;
use crate::packet::SignedPacket;
use crate::rebroadcast::PacketPublisher;
use crate::rebroadcast::RebroadcastEngine;
use crate::retry::retry_bounded;
use crate::retry::RetryOutcome;
use crate::scoring::score_group;
use crate::sensing::SensingRegistry;

/// Invoked once per accepted observation with the resolved root packet and
/// its corroborating rebroadcasts.
pub type ObservationCallback = Arc<dyn Fn(SignedPacket, Vec<SignedPacket>) + Send + Sync>;

/// Handle to a running gossip node pipeline.
///
/// Dropping the handle does not stop the pipeline; call [`Node::shutdown`].
pub struct Node {
    ingest_tx: mpsc::UnboundedSender<SignedPacket>,
    registry: SensingRegistry,
    dedup: DedupTracker,
    cancel: CancellationToken,
}

impl Node {
    /// Spawn the pipeline tasks and return a handle.
    ///
    /// `keypair` comes from the external provisioning collaborator;
    /// `publisher` is the outbound transport boundary; `on_observation`
    /// fires once per accepted group.
    pub fn spawn(
        config: NodeConfig,
        keypair: NodeKeypair,
        publisher: Arc<dyn PacketPublisher>,
        on_observation: ObservationCallback,
    ) -> Self {
        let verifier = ChainVerifier::new(config.message_encoding);
        let registry = SensingRegistry::new(config.sensing_threshold);
        let dedup = DedupTracker::new();
        let cancel = CancellationToken::new();

        info!(
            algorithm = %config.signature_algorithm,
            public_key = %keypair.public_key(),
            "starting gossip node pipeline"
        );

        let engine = Arc::new(RebroadcastEngine::new(
            &config,
            keypair,
            registry.clone(),
            publisher,
        ));

        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();
        let (arrival_tx, arrival_rx) = mpsc::unbounded_channel();
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();

        tokio::spawn(intake_task(
            verifier,
            ingest_rx,
            arrival_tx,
            engine,
            cancel.clone(),
        ));
        tokio::spawn(grouping_task(
            verifier,
            config.quiet_window,
            arrival_rx,
            flush_tx,
            cancel.clone(),
        ));
        tokio::spawn(evaluation_task(
            config,
            flush_rx,
            registry.clone(),
            dedup.clone(),
            on_observation,
            cancel.clone(),
        ));

        Self {
            ingest_tx,
            registry,
            dedup,
            cancel,
        }
    }

    /// Inbound boundary: hand a packet delivered by the transport to the
    /// pipeline. Invalid chains are discarded silently downstream.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` once [`Node::shutdown`] has been called.
    pub fn ingest(&self, packet: SignedPacket) -> Result<()> {
        if self.cancel.is_cancelled() {
            return ShuttingDownSnafu.fail();
        }
        self.ingest_tx.send(packet).map_err(|_| ShuttingDownSnafu.build())
    }

    /// The sensing registry; the external sensor-ingestion endpoint records
    /// local observations here.
    pub fn sensing_registry(&self) -> &SensingRegistry {
        &self.registry
    }

    /// The delivered-group tracker, mostly useful for observability.
    pub fn dedup_tracker(&self) -> &DedupTracker {
        &self.dedup
    }

    /// Stop accepting packets and wind down all pipeline tasks.
    ///
    /// In-flight bucket timers and evaluations are abandoned idempotently;
    /// nothing is double-delivered.
    pub fn shutdown(&self) {
        info!("gossip node pipeline shutting down");
        self.cancel.cancel();
    }
}

/// Verify each inbound chain and fan out to grouping and the rebroadcast
/// engine. Invalid packets are dropped here, silently by design.
async fn intake_task(
    verifier: ChainVerifier,
    mut ingest_rx: mpsc::UnboundedReceiver<SignedPacket>,
    arrival_tx: mpsc::UnboundedSender<(GroupKey, SignedPacket)>,
    engine: Arc<RebroadcastEngine>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            packet = ingest_rx.recv() => {
                let Some(packet) = packet else {
                    info!("intake exiting: ingest channel closed");
                    break;
                };
                let key = match verifier.group_key(&packet) {
                    Ok(key) => key,
                    Err(error) => {
                        debug!(packet = %packet, error = %error, "discarding packet with invalid chain");
                        continue;
                    }
                };
                if arrival_tx.send((key, packet.clone())).is_err() {
                    info!("intake exiting: grouping engine gone");
                    break;
                }
                // Rebroadcast consideration can wait on sensing retries;
                // run it apart so ingestion keeps moving.
                let engine = engine.clone();
                let consider_cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        outcome = engine.consider(&packet) => {
                            if let Err(error) = outcome {
                                warn!(packet = %packet, error = %error, "rebroadcast abandoned");
                            }
                        }
                        () = consider_cancel.cancelled() => {}
                    }
                });
            }
            () = cancel.cancelled() => {
                info!("intake cancelled");
                break;
            }
        }
    }
}

/// Evaluate each flushed group: score, retry provisional outcomes, dedup,
/// deliver. Each group gets its own task so one group's retries never delay
/// another's evaluation; a single group is never re-scored concurrently with
/// itself.
async fn evaluation_task(
    config: NodeConfig,
    mut flush_rx: mpsc::UnboundedReceiver<FlushedGroup>,
    registry: SensingRegistry,
    dedup: DedupTracker,
    on_observation: ObservationCallback,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            group = flush_rx.recv() => {
                let Some(group) = group else {
                    info!("evaluation exiting: flush channel closed");
                    break;
                };
                let config = config.clone();
                let registry = registry.clone();
                let dedup = dedup.clone();
                let on_observation = on_observation.clone();
                let eval_cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = evaluate_group(group, config, registry, dedup, on_observation) => {}
                        () = eval_cancel.cancelled() => {}
                    }
                });
            }
            () = cancel.cancelled() => {
                info!("evaluation cancelled");
                break;
            }
        }
    }
}

/// Score one group with bounded retries, then deliver at most once.
async fn evaluate_group(
    group: FlushedGroup,
    config: NodeConfig,
    registry: SensingRegistry,
    dedup: DedupTracker,
    on_observation: ObservationCallback,
) {
    let threshold = config.confidence_threshold;
    let accepted = retry_bounded(config.retry_attempts, config.retry_delay, || {
        let group = &group;
        let registry = &registry;
        async move {
            // Re-scores against the current registry state each attempt.
            let score = match score_group(&group.root, &group.rebroadcasts, registry) {
                Ok(score) => score,
                Err(error) => {
                    error!(group = %group.key, error = %error, "scoring failed, dropping group");
                    return RetryOutcome::Drop;
                }
            };
            if score.accepts(threshold) {
                return RetryOutcome::Accept(score);
            }
            if score.any_unsensed {
                info!(
                    group = %group.key,
                    score = score.total,
                    threshold,
                    "confidence low but not all members sensed yet, waiting"
                );
                RetryOutcome::Retry
            } else {
                info!(group = %group.key, score = score.total, threshold, "confidence low, ignoring group");
                RetryOutcome::Drop
            }
        }
    })
    .await;

    let Some(score) = accepted else {
        debug!(group = %group.key, "group dropped without delivery");
        return;
    };

    if !dedup.first_delivery(group.key) {
        debug!(group = %group.key, "group already delivered, ignoring duplicate");
        return;
    }

    let latency_ms = now_ms()
        .ok()
        .map(|now| now.saturating_sub(group.root.source().timestamp_ms));
    info!(
        group = %group.key,
        score = score.total,
        corroborations = group.rebroadcasts.len(),
        latency_ms,
        "accepted legitimate observation"
    );
    on_observation(group.root, group.rebroadcasts);
}
