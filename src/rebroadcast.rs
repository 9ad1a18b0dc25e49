//! Per-packet rebroadcast decision engine.
//!
//! Independent of grouping and confidence: every packet that passes chain
//! verification is considered on its own. A node re-publishes a packet only
//! when it can personally vouch for it — the packet's source must be freshly
//! sensed locally, and the chain must not root at this node's own broadcast
//! (echo prevention).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::chain::ChainVerifier;
use crate::config::MessageEncoding;
use crate::config::NodeConfig;
use crate::error::GossipError;
use crate::error::Result;
use crate::keys::NodeKeypair;
use crate::packet::Packet;
use crate::packet::PacketSource;
use crate::packet::SignedPacket;
use crate::retry::retry_bounded;
use crate::retry::RetryOutcome;
use crate::sensing::SensingRegistry;

/// Outbound boundary to the excluded transport collaborator.
///
/// The core hands over a fully signed packet; topics and addressing are the
/// transport's concern.
#[async_trait]
pub trait PacketPublisher: Send + Sync {
    /// Publish a signed packet to the network.
    async fn publish(
        &self,
        packet: &SignedPacket,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Decides, per verified packet, whether this node re-signs and re-publishes.
pub struct RebroadcastEngine {
    verifier: ChainVerifier,
    encoding: MessageEncoding,
    keypair: NodeKeypair,
    registry: SensingRegistry,
    publisher: Arc<dyn PacketPublisher>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl RebroadcastEngine {
    /// Build the engine from configuration and shared collaborators.
    pub fn new(
        config: &NodeConfig,
        keypair: NodeKeypair,
        registry: SensingRegistry,
        publisher: Arc<dyn PacketPublisher>,
    ) -> Self {
        Self {
            verifier: ChainVerifier::new(config.message_encoding),
            encoding: config.message_encoding,
            keypair,
            registry,
            publisher,
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
        }
    }

    /// Consider corroborating `packet`, publishing a signed rebroadcast when
    /// this node can vouch for it.
    ///
    /// Quietly declines (Ok) when the chain roots at this node's own key,
    /// when the source never becomes freshly sensed within the retry budget,
    /// or when no location is recorded for the sensed key.
    ///
    /// # Errors
    ///
    /// - `ChainInvalid` / `ChainTooDeep` if the chain fails re-verification
    /// - `Transport` if the publish is rejected; the operation is abandoned
    ///   and other in-flight work is unaffected
    pub async fn consider(&self, packet: &SignedPacket) -> Result<()> {
        let root = self.verifier.resolve_root(packet)?;
        if &root.source().public_key == self.keypair.public_key() {
            debug!(packet = %packet, "chain roots at our own broadcast, skipping echo");
            return Ok(());
        }

        let source = packet.source().clone();
        let sensed = retry_bounded(self.retry_attempts, self.retry_delay, || {
            let registry = self.registry.clone();
            let public_key = source.public_key.clone();
            let timestamp_ms = source.timestamp_ms;
            async move {
                if registry.is_fresh(&public_key, timestamp_ms) {
                    RetryOutcome::Accept(())
                } else {
                    debug!(public_key = %public_key, "source not yet sensed locally");
                    RetryOutcome::Retry
                }
            }
        })
        .await;
        if sensed.is_none() {
            // A node cannot vouch for what it has not sensed.
            debug!(packet = %packet, "source never sensed within retry budget, not corroborating");
            return Ok(());
        }

        let Some(location) = self.registry.location_of(&source.public_key) else {
            warn!(public_key = %source.public_key, "no location recorded for sensed key, dropping rebroadcast");
            return Ok(());
        };

        let rebroadcast = Packet::Rebroadcast {
            source: PacketSource::new(self.keypair.public_key().clone())?,
            location,
            original: Box::new(packet.clone()),
        };
        let signed = SignedPacket::sign(rebroadcast, &self.keypair, self.encoding)?;
        self.publisher
            .publish(&signed)
            .await
            .map_err(|source| GossipError::Transport {
                message: source.to_string(),
            })?;
        info!(packet = %signed, "published corroborating rebroadcast");
        Ok(())
    }
}
