//! End-to-end pipeline scenarios: grouped acceptance, retry on unsensed
//! corroborations, duplicate suppression, and rebroadcast echo prevention.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use qr_gossip::MessageEncoding;
use qr_gossip::Node;
use qr_gossip::NodeConfig;
use qr_gossip::NodeKeypair;
use qr_gossip::Packet;
use qr_gossip::PacketPublisher;
use qr_gossip::PacketSource;
use qr_gossip::SignedPacket;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Opt-in log output while debugging a scenario:
/// `RUST_LOG=qr_gossip=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Publisher that records every outbound packet.
#[derive(Default)]
struct CapturingPublisher {
    published: Mutex<Vec<SignedPacket>>,
}

#[async_trait]
impl PacketPublisher for CapturingPublisher {
    async fn publish(
        &self,
        packet: &SignedPacket,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.published.lock().unwrap().push(packet.clone());
        Ok(())
    }
}

fn broadcast(keypair: &NodeKeypair) -> SignedPacket {
    let packet = Packet::Broadcast {
        source: PacketSource::new(keypair.public_key().clone()).unwrap(),
        event: serde_json::json!({"object": "pallet-9"}),
    };
    SignedPacket::sign(packet, keypair, MessageEncoding::Utf8).unwrap()
}

fn rebroadcast(keypair: &NodeKeypair, original: &SignedPacket) -> SignedPacket {
    let packet = Packet::Rebroadcast {
        source: PacketSource::new(keypair.public_key().clone()).unwrap(),
        location: "dock-3".into(),
        original: Box::new(original.clone()),
    };
    SignedPacket::sign(packet, keypair, MessageEncoding::Utf8).unwrap()
}

/// Short windows so scenarios complete quickly.
fn fast_config() -> NodeConfig {
    NodeConfig {
        quiet_window: Duration::from_millis(50),
        retry_delay: Duration::from_millis(20),
        ..NodeConfig::default()
    }
}

type Delivery = (SignedPacket, Vec<SignedPacket>);

fn spawn_node(config: NodeConfig) -> (Node, Arc<CapturingPublisher>, mpsc::UnboundedReceiver<Delivery>) {
    init_tracing();
    let publisher = Arc::new(CapturingPublisher::default());
    let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
    let node = Node::spawn(
        config,
        NodeKeypair::generate(),
        publisher.clone(),
        Arc::new(move |root, rebroadcasts| {
            let _ = delivered_tx.send((root, rebroadcasts));
        }),
    );
    (node, publisher, delivered_rx)
}

#[tokio::test]
async fn two_fresh_depth_two_corroborations_reach_threshold() {
    let (node, _publisher, mut delivered) = spawn_node(fast_config());

    let observer_x = NodeKeypair::generate();
    let relay_y = NodeKeypair::generate();
    let relay_z = NodeKeypair::generate();

    let root = broadcast(&observer_x);
    let from_y = rebroadcast(&relay_y, &root);
    let from_z = rebroadcast(&relay_z, &root);

    // Both relays freshly sensed locally; each depth-2 member contributes 0.5.
    let registry = node.sensing_registry();
    registry.record(relay_y.public_key().clone(), "dock-3".into()).unwrap();
    registry.record(relay_z.public_key().clone(), "dock-4".into()).unwrap();

    node.ingest(root.clone()).unwrap();
    node.ingest(from_y.clone()).unwrap();
    node.ingest(from_z.clone()).unwrap();

    let (delivered_root, corroborations) =
        timeout(Duration::from_secs(2), delivered.recv()).await.unwrap().unwrap();
    assert_eq!(delivered_root, root);
    assert_eq!(corroborations, vec![from_y, from_z]);

    node.shutdown();
}

#[tokio::test]
async fn stale_corroboration_retries_until_sensed() {
    let (node, _publisher, mut delivered) = spawn_node(fast_config());

    let observer_x = NodeKeypair::generate();
    let relay_y = NodeKeypair::generate();
    let relay_z = NodeKeypair::generate();

    let root = broadcast(&observer_x);
    let from_y = rebroadcast(&relay_y, &root);
    let from_z = rebroadcast(&relay_z, &root);

    // Only Y is sensed up front: score 0.5 < 1.0 with Z unsensed, so the
    // group stays provisional and gets re-scored.
    node.sensing_registry()
        .record(relay_y.public_key().clone(), "dock-3".into())
        .unwrap();

    node.ingest(root.clone()).unwrap();
    node.ingest(from_y).unwrap();
    node.ingest(from_z).unwrap();

    // Let the bucket flush and at least one provisional evaluation happen,
    // then have the local sensor catch up with Z.
    tokio::time::sleep(Duration::from_millis(80)).await;
    node.sensing_registry()
        .record(relay_z.public_key().clone(), "dock-4".into())
        .unwrap();

    let (delivered_root, corroborations) =
        timeout(Duration::from_secs(2), delivered.recv()).await.unwrap().unwrap();
    assert_eq!(delivered_root, root);
    assert_eq!(corroborations.len(), 2);

    node.shutdown();
}

#[tokio::test]
async fn exhausted_retries_drop_the_group_without_delivery() {
    let (node, _publisher, mut delivered) = spawn_node(fast_config());

    let observer_x = NodeKeypair::generate();
    let relay_y = NodeKeypair::generate();

    let root = broadcast(&observer_x);
    let from_y = rebroadcast(&relay_y, &root);

    // Nothing ever sensed: provisional every attempt, budget runs out.
    node.ingest(root).unwrap();
    node.ingest(from_y).unwrap();

    assert!(timeout(Duration::from_millis(500), delivered.recv()).await.is_err());

    node.shutdown();
}

#[tokio::test]
async fn definite_rejection_does_not_retry() {
    // All members sensed but threshold unreachable: a definite rejection,
    // which must drop immediately rather than burn the retry budget.
    let config = NodeConfig {
        confidence_threshold: 10.0,
        retry_delay: Duration::from_secs(30),
        ..fast_config()
    };
    let (node, _publisher, mut delivered) = spawn_node(config);

    let observer_x = NodeKeypair::generate();
    let root = broadcast(&observer_x);
    node.sensing_registry()
        .record(observer_x.public_key().clone(), "dock-1".into())
        .unwrap();

    node.ingest(root).unwrap();

    // With a 30s retry delay, delivery staying empty this quickly means the
    // group was dropped on the first evaluation.
    assert!(timeout(Duration::from_millis(400), delivered.recv()).await.is_err());

    node.shutdown();
}

#[tokio::test]
async fn duplicate_group_delivers_exactly_once() {
    let (node, _publisher, mut delivered) = spawn_node(fast_config());

    let observer_x = NodeKeypair::generate();
    let relay_y = NodeKeypair::generate();

    let root = broadcast(&observer_x);
    let from_y = rebroadcast(&relay_y, &root);

    let registry = node.sensing_registry();
    registry.record(observer_x.public_key().clone(), "dock-1".into()).unwrap();
    registry.record(relay_y.public_key().clone(), "dock-2".into()).unwrap();

    node.ingest(root.clone()).unwrap();
    node.ingest(from_y.clone()).unwrap();
    let first = timeout(Duration::from_secs(2), delivered.recv()).await.unwrap().unwrap();
    assert_eq!(first.0, root);

    // The same packets arrive again after acceptance (duplicate relay).
    node.ingest(root.clone()).unwrap();
    node.ingest(from_y).unwrap();
    assert!(timeout(Duration::from_millis(400), delivered.recv()).await.is_err());

    node.shutdown();
}

#[tokio::test]
async fn late_lone_rebroadcast_is_dropped_quietly() {
    let (node, _publisher, mut delivered) = spawn_node(fast_config());

    let observer_x = NodeKeypair::generate();
    let relay_y = NodeKeypair::generate();

    let root = broadcast(&observer_x);
    let from_y = rebroadcast(&relay_y, &root);

    let registry = node.sensing_registry();
    registry.record(observer_x.public_key().clone(), "dock-1".into()).unwrap();
    registry.record(relay_y.public_key().clone(), "dock-2".into()).unwrap();

    node.ingest(root.clone()).unwrap();
    timeout(Duration::from_secs(2), delivered.recv()).await.unwrap().unwrap();

    // A straggler corroboration after its group already flushed opens a
    // rootless bucket, which is logged and discarded.
    node.ingest(from_y).unwrap();
    assert!(timeout(Duration::from_millis(400), delivered.recv()).await.is_err());

    node.shutdown();
}

#[tokio::test]
async fn invalid_chain_never_reaches_delivery() {
    let (node, _publisher, mut delivered) = spawn_node(fast_config());

    let observer_x = NodeKeypair::generate();
    node.sensing_registry()
        .record(observer_x.public_key().clone(), "dock-1".into())
        .unwrap();

    let mut forged = broadcast(&observer_x);
    if let Packet::Broadcast { source, .. } = &mut forged.packet {
        source.timestamp_ms += 1;
    }

    node.ingest(forged).unwrap();
    assert!(timeout(Duration::from_millis(400), delivered.recv()).await.is_err());

    node.shutdown();
}

#[tokio::test]
async fn sensed_foreign_broadcast_is_corroborated_and_published() {
    let (node, publisher, _delivered) = spawn_node(fast_config());

    let observer_x = NodeKeypair::generate();
    let root = broadcast(&observer_x);
    node.sensing_registry()
        .record(observer_x.public_key().clone(), "dock-7".into())
        .unwrap();

    node.ingest(root.clone()).unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if !publisher.published.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let published = publisher.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    match &published[0].packet {
        Packet::Rebroadcast { location, original, .. } => {
            assert_eq!(location, &"dock-7".into());
            assert_eq!(**original, root);
        }
        Packet::Broadcast { .. } => panic!("expected a rebroadcast"),
    }

    node.shutdown();
}

#[tokio::test]
async fn own_chain_echo_is_never_republished() {
    init_tracing();
    let publisher = Arc::new(CapturingPublisher::default());
    let keypair = NodeKeypair::generate();
    let own_public = keypair.public_key().clone();

    // Sign a broadcast as this node before handing the keypair over.
    let own_root = SignedPacket::sign(
        Packet::Broadcast {
            source: PacketSource::new(own_public.clone()).unwrap(),
            event: serde_json::json!({"object": "pallet-9"}),
        },
        &keypair,
        MessageEncoding::Utf8,
    )
    .unwrap();

    let node = Node::spawn(fast_config(), keypair, publisher.clone(), Arc::new(|_, _| {}));

    let relay = NodeKeypair::generate();
    let echoed = rebroadcast(&relay, &own_root);
    node.sensing_registry()
        .record(relay.public_key().clone(), "dock-8".into())
        .unwrap();

    node.ingest(echoed).unwrap();

    // Give the rebroadcast engine ample time to (wrongly) publish.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(publisher.published.lock().unwrap().is_empty());

    node.shutdown();
}
