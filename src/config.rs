//! Node configuration: named options with defaults from [`crate::constants`].
//!
//! Everything is supplied programmatically; there is no config file surface.

use std::time::Duration;

use crate::constants::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::constants::DEFAULT_QUIET_WINDOW_MS;
use crate::constants::DEFAULT_RETRY_ATTEMPTS;
use crate::constants::DEFAULT_RETRY_DELAY_MS;
use crate::constants::DEFAULT_SENSING_THRESHOLD_MS;

/// Signature scheme identifier recorded in configuration.
///
/// Ed25519 is the only supported scheme; the variant exists so the option is
/// named rather than implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// Ed25519 detached signatures over canonical packet JSON.
    #[default]
    Ed25519,
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// Text encoding applied to canonical packet JSON before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageEncoding {
    /// UTF-8 bytes of the JSON text.
    #[default]
    Utf8,
}

impl MessageEncoding {
    /// Encode canonical text into the bytes that get signed.
    pub(crate) fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
        }
    }
}

/// Options governing verification, grouping, scoring, and retry behavior.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Signature scheme used for signing and verification.
    pub signature_algorithm: SignatureAlgorithm,
    /// Encoding of canonical packet text before signing.
    pub message_encoding: MessageEncoding,
    /// Quiet window after which a group bucket flushes.
    pub quiet_window: Duration,
    /// How long a local sensing observation stays fresh.
    pub sensing_threshold: Duration,
    /// Minimum confidence score required to accept a group.
    pub confidence_threshold: f64,
    /// Re-evaluations allowed after a provisional failure.
    pub retry_attempts: u32,
    /// Delay between provisional re-evaluations.
    pub retry_delay: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            signature_algorithm: SignatureAlgorithm::default(),
            message_encoding: MessageEncoding::default(),
            quiet_window: Duration::from_millis(DEFAULT_QUIET_WINDOW_MS),
            sensing_threshold: Duration::from_millis(DEFAULT_SENSING_THRESHOLD_MS),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}
