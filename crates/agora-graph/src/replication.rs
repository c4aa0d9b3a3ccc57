//! Moving deltas between replicas.
//!
//! [`link`] joins two in-process replicas directly. [`start_network_sync`]
//! bridges a replica to the libp2p swarm: accepted local changes are
//! published on the graph topic, received frames are merged, and whenever a
//! peer joins the topic the full state is published so writes made while
//! disconnected reach it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_shared::constants::{GRAPH_TOPIC, MAX_MESSAGE_SIZE};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::network::{SwarmCommand, SwarmNotification};
use crate::state::Delta;

/// Upper bound on an encoded gossip frame. The rest of the transmit limit
/// is left for the gossipsub envelope.
pub const MAX_FRAME_BYTES: usize = MAX_MESSAGE_SIZE - 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncFrame {
    Deltas(Vec<Delta>),
}

pub fn encode_frame(frame: &SyncFrame) -> Result<Vec<u8>, GraphError> {
    Ok(bincode::serialize(frame)?)
}

pub fn decode_frame(data: &[u8]) -> Result<SyncFrame, GraphError> {
    Ok(bincode::deserialize(data)?)
}

/// Pack `deltas` into encoded frames of at most `limit` bytes each. A delta
/// that cannot fit in a frame on its own is dropped.
pub fn encode_frames(deltas: Vec<Delta>, limit: usize) -> Vec<Vec<u8>> {
    let header = bincode::serialized_size(&SyncFrame::Deltas(Vec::new())).unwrap_or(0) as usize;
    let mut chunks: Vec<Vec<Delta>> = Vec::new();
    let mut chunk = Vec::new();
    let mut size = header;

    for delta in deltas {
        let bytes = match bincode::serialized_size(&delta) {
            Ok(bytes) => bytes as usize,
            Err(e) => {
                warn!(error = %e, "Failed to size delta");
                continue;
            }
        };
        if header + bytes > limit {
            warn!(node = %delta.node, field = %delta.field, bytes, "Delta too large to replicate");
            continue;
        }
        if size + bytes > limit {
            chunks.push(std::mem::take(&mut chunk));
            size = header;
        }
        size += bytes;
        chunk.push(delta);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }

    chunks
        .into_iter()
        .filter_map(|chunk| match encode_frame(&SyncFrame::Deltas(chunk)) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(error = %e, "Failed to encode sync frame");
                None
            }
        })
        .collect()
}

/// A bidirectional in-process link. Dropping it leaves the tasks running;
/// call [`Link::sever`] to disconnect.
pub struct Link {
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    pub fn sever(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Connect two replicas. Each side first receives the other's full state.
pub fn link(a: &Graph, b: &Graph) -> Link {
    let (a_id, a_out) = a.attach_replica();
    let (b_id, b_out) = b.attach_replica();
    Link {
        tasks: vec![pump(a_out, b.clone(), b_id), pump(b_out, a.clone(), a_id)],
    }
}

fn pump(
    mut from: mpsc::UnboundedReceiver<Vec<Delta>>,
    to: Graph,
    origin: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(deltas) = from.recv().await {
            to.merge(origin, deltas);
        }
    })
}

async fn publish(commands: &mpsc::Sender<SwarmCommand>, deltas: Vec<Delta>) {
    for data in encode_frames(deltas, MAX_FRAME_BYTES) {
        if commands
            .send(SwarmCommand::Publish {
                topic: GRAPH_TOPIC.to_string(),
                data,
            })
            .await
            .is_err()
        {
            debug!("Swarm gone, dropping sync frame");
            return;
        }
    }
}

/// Bridge `graph` to a running swarm. The task ends when the swarm's
/// notification channel closes.
pub async fn start_network_sync(
    graph: Graph,
    commands: mpsc::Sender<SwarmCommand>,
    mut notifications: mpsc::Receiver<SwarmNotification>,
) -> anyhow::Result<JoinHandle<()>> {
    commands
        .send(SwarmCommand::Subscribe(GRAPH_TOPIC.to_string()))
        .await?;
    let (replica, mut outbound) = graph.attach_replica();
    info!(topic = GRAPH_TOPIC, "Graph network sync started");

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(deltas) = outbound.recv() => publish(&commands, deltas).await,

                notification = notifications.recv() => match notification {
                    Some(SwarmNotification::MessageReceived { source, topic, data })
                        if topic == GRAPH_TOPIC =>
                    {
                        match decode_frame(&data) {
                            Ok(SyncFrame::Deltas(deltas)) => {
                                debug!(
                                    source = ?source,
                                    count = deltas.len(),
                                    "Merging remote deltas"
                                );
                                graph.merge(replica, deltas);
                            }
                            Err(e) => {
                                warn!(source = ?source, error = %e, "Ignoring malformed sync frame")
                            }
                        }
                    }
                    Some(SwarmNotification::TopicJoined { peer_id, topic })
                        if topic == GRAPH_TOPIC =>
                    {
                        match graph.snapshot().await {
                            Ok(snapshot) => {
                                info!(
                                    peer = %peer_id,
                                    fields = snapshot.len(),
                                    "Exchanging graph state"
                                );
                                publish(&commands, snapshot).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "Graph closed, stopping network sync");
                                break;
                            }
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        info!("Graph network sync stopped");
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::graph::{spawn_graph, GraphConfig};
    use crate::state::FieldValue;
    use agora_shared::Path;

    #[test]
    fn frame_encoding_preserves_deltas() {
        let frame = SyncFrame::Deltas(vec![Delta {
            node: Path::new(["voice", "s/v", "peers"]),
            field: "ab".into(),
            value: FieldValue::Link,
            state: 7,
        }]);
        let data = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&data).unwrap(), frame);
        assert!(decode_frame(&[0xff, 0x01]).is_err());
    }

    fn avatar_delta(owner: &str, bytes: usize) -> Delta {
        let url = format!("data:image/png;base64,{}", "A".repeat(bytes));
        Delta {
            node: Path::new(["avatars".to_string(), owner.to_string()]),
            field: "value".into(),
            value: FieldValue::Scalar(serde_json::to_string(&url).unwrap()),
            state: 1,
        }
    }

    #[test]
    fn large_snapshots_split_by_encoded_size() {
        let deltas: Vec<Delta> = (0..5).map(|i| avatar_delta(&format!("u{i}"), 100_000)).collect();
        let frames = encode_frames(deltas.clone(), MAX_FRAME_BYTES);

        assert!(frames.len() >= 3);
        assert!(frames.iter().all(|f| f.len() <= MAX_FRAME_BYTES));
        let mut decoded = Vec::new();
        for frame in &frames {
            let SyncFrame::Deltas(chunk) = decode_frame(frame).unwrap();
            decoded.extend(chunk);
        }
        assert_eq!(decoded, deltas);
    }

    #[test]
    fn oversized_delta_is_dropped_not_sent() {
        let deltas = vec![avatar_delta("ab", 300_000), avatar_delta("cd", 10)];
        let frames = encode_frames(deltas, MAX_FRAME_BYTES);

        assert_eq!(frames.len(), 1);
        let SyncFrame::Deltas(sent) = decode_frame(&frames[0]).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].node, Path::new(["avatars", "cd"]));
    }

    #[tokio::test]
    async fn linked_replicas_converge() {
        let a = spawn_graph(GraphConfig::default()).unwrap();
        let b = spawn_graph(GraphConfig::default()).unwrap();
        let path = Path::new(["dms", "x::y", "1-aaaaaa"]);

        a.put(&path, json!({"id": "1-aaaaaa"}));
        let _link = link(&a, &b);

        let seen = b.once(&path, Duration::from_secs(2)).await;
        assert_eq!(seen, Some(json!({"id": "1-aaaaaa"})));

        let mut sub = a.on(&Path::new(["~bob", "profile"]));
        b.put(&Path::new(["~bob", "profile"]), json!({"alias": "bob"}));
        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.value, Some(json!({"alias": "bob"})));
    }

    #[tokio::test]
    async fn offline_writes_arrive_after_relink() {
        let a = spawn_graph(GraphConfig::default()).unwrap();
        let b = spawn_graph(GraphConfig::default()).unwrap();
        link(&a, &b).sever();

        let path = Path::new(["friend_requests", "bob", "alice"]);
        a.put(&path, json!({"from": "alice", "time": 1}));
        assert_eq!(b.once(&path, Duration::from_millis(100)).await, None);

        let _link = link(&a, &b);
        assert!(b.once(&path, Duration::from_secs(2)).await.is_some());
    }
}
