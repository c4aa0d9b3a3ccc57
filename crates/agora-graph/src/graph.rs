//! Graph replica actor.
//!
//! The replica state lives in a dedicated tokio task. [`Graph`] handles talk
//! to it over an unbounded command channel, so writes never block and never
//! fail at the call site. Subscriptions are plain channels: the task pushes a
//! [`GraphEvent`] for every matching change, in the order changes were merged.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use agora_shared::Path;
use agora_store::{Database, JournalRow};

use crate::error::GraphError;
use crate::state::{ancestor_links, flatten, Delta, FieldValue, GraphState, State};

/// Remote deltas stamped further ahead of the local clock than this are
/// dropped.
const MAX_CLOCK_DRIFT_MS: State = 5 * 60 * 1000;

pub type ReplicaId = u64;

/// A change observed by a subscription.
///
/// For `on` subscriptions `path` is the subscribed path; for `map`
/// subscriptions it is the child that changed and `key` is its name.
/// `value` is `None` when the entry was deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEvent {
    pub path: Path,
    pub key: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Node,
    Map,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub fields: usize,
    pub subscriptions: usize,
    pub replicas: usize,
}

enum Command {
    Put {
        path: Path,
        value: Value,
    },
    Subscribe {
        id: u64,
        path: Path,
        mode: Mode,
        events: mpsc::UnboundedSender<GraphEvent>,
    },
    Unsubscribe {
        id: u64,
    },
    Once {
        path: Path,
        reply: oneshot::Sender<Option<Value>>,
    },
    Merge {
        origin: ReplicaId,
        deltas: Vec<Delta>,
    },
    Attach {
        id: ReplicaId,
        outbound: mpsc::UnboundedSender<Vec<Delta>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Delta>>,
    },
    Stats {
        reply: oneshot::Sender<GraphStats>,
    },
    Shutdown,
}

/// Configuration for spawning a replica.
#[derive(Default)]
pub struct GraphConfig {
    /// Journal every accepted write here and reload it on start.
    pub journal: Option<Database>,
}

/// Handle to a running replica. Cheap to clone.
#[derive(Clone)]
pub struct Graph {
    commands: mpsc::UnboundedSender<Command>,
    ids: Arc<AtomicU64>,
}

/// Spawn a replica task, restoring any journalled state first.
pub fn spawn_graph(config: GraphConfig) -> Result<Graph, GraphError> {
    let mut replica = Replica::new(config.journal);
    replica.restore()?;

    let (commands, rx) = mpsc::unbounded_channel();
    tokio::spawn(replica.run(rx));

    Ok(Graph {
        commands,
        ids: Arc::new(AtomicU64::new(1)),
    })
}

impl Graph {
    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Merge `value` at `path`. Objects are merged field by field, `null`
    /// deletes. Fire-and-forget.
    pub fn put(&self, path: &Path, value: Value) {
        let command = Command::Put {
            path: path.clone(),
            value,
        };
        if self.commands.send(command).is_err() {
            debug!(path = %path, "Graph replica closed, write dropped");
        }
    }

    pub fn delete(&self, path: &Path) {
        self.put(path, Value::Null);
    }

    fn subscribe(&self, path: &Path, mode: Mode) -> Subscription {
        let id = self.next_id();
        let (events, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Subscribe {
            id,
            path: path.clone(),
            mode,
            events,
        });
        Subscription {
            id,
            path: path.clone(),
            events: rx,
            commands: self.commands.clone(),
        }
    }

    /// Live subscription to the value at `path`: the current value (if any)
    /// and then every change.
    pub fn on(&self, path: &Path) -> Subscription {
        self.subscribe(path, Mode::Node)
    }

    /// Live subscription to the children of `path`: one event per existing
    /// child, then one per added, changed or deleted child.
    pub fn map(&self, path: &Path) -> Subscription {
        self.subscribe(path, Mode::Map)
    }

    /// Best-effort single read. Waits up to `timeout` for a value to appear
    /// and returns `None` if none does.
    pub async fn once(&self, path: &Path, timeout: Duration) -> Option<Value> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Once {
                path: path.clone(),
                reply,
            })
            .ok()?;
        tokio::time::timeout(timeout, rx).await.ok()?.ok()?
    }

    /// Register an outbound replication stream. The current state is sent
    /// first, then every accepted change not received from this replica.
    pub fn attach_replica(&self) -> (ReplicaId, mpsc::UnboundedReceiver<Vec<Delta>>) {
        let id = self.next_id();
        let (outbound, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Attach { id, outbound });
        (id, rx)
    }

    /// Merge deltas received from replica `origin`.
    pub fn merge(&self, origin: ReplicaId, deltas: Vec<Delta>) {
        if deltas.is_empty() {
            return;
        }
        let _ = self.commands.send(Command::Merge { origin, deltas });
    }

    pub async fn snapshot(&self) -> Result<Vec<Delta>, GraphError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .map_err(|_| GraphError::Closed)?;
        rx.await.map_err(|_| GraphError::Closed)
    }

    pub async fn stats(&self) -> Result<GraphStats, GraphError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| GraphError::Closed)?;
        rx.await.map_err(|_| GraphError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Receiving end of [`Graph::on`] / [`Graph::map`]. Dropping it
/// unsubscribes.
pub struct Subscription {
    id: u64,
    path: Path,
    events: mpsc::UnboundedReceiver<GraphEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next event, or `None` once the replica has stopped.
    pub async fn recv(&mut self) -> Option<GraphEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<GraphEvent> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe { id: self.id });
    }
}

// ---------------------------------------------------------------------------
// Replica task
// ---------------------------------------------------------------------------

struct Subscriber {
    path: Path,
    mode: Mode,
    events: mpsc::UnboundedSender<GraphEvent>,
}

struct Replica {
    state: GraphState,
    clock: State,
    journal: Option<Database>,
    subscriptions: HashMap<u64, Subscriber>,
    waiters: Vec<(Path, oneshot::Sender<Option<Value>>)>,
    replicas: HashMap<ReplicaId, mpsc::UnboundedSender<Vec<Delta>>>,
}

impl Replica {
    fn new(journal: Option<Database>) -> Self {
        Self {
            state: GraphState::new(),
            clock: 0,
            journal,
            subscriptions: HashMap::new(),
            waiters: Vec::new(),
            replicas: HashMap::new(),
        }
    }

    fn restore(&mut self) -> Result<(), GraphError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let rows = journal.load_fields()?;
        let mut restored = 0usize;
        for row in rows {
            let Some(value) = FieldValue::decode(&row.value) else {
                warn!(field = %row.field, "Skipping undecodable journal row");
                continue;
            };
            self.clock = self.clock.max(row.state);
            self.state.merge(&Delta {
                node: Path::new(row.path),
                field: row.field,
                value,
                state: row.state,
            });
            restored += 1;
        }

        info!(fields = restored, "Restored graph from journal");
        Ok(())
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Put { path, value } => self.put(path, value),
                Command::Subscribe {
                    id,
                    path,
                    mode,
                    events,
                } => self.subscribe(id, path, mode, events),
                Command::Unsubscribe { id } => {
                    self.subscriptions.remove(&id);
                }
                Command::Once { path, reply } => {
                    self.waiters.retain(|(_, waiter)| !waiter.is_closed());
                    match self.state.resolve(&path) {
                        Some(value) => {
                            let _ = reply.send(Some(value));
                        }
                        None => self.waiters.push((path, reply)),
                    }
                }
                Command::Merge { origin, deltas } => self.merge_remote(origin, deltas),
                Command::Attach { id, outbound } => {
                    let snapshot = self.state.snapshot();
                    if !snapshot.is_empty() && outbound.send(snapshot).is_err() {
                        continue;
                    }
                    debug!(replica = id, "Replica attached");
                    self.replicas.insert(id, outbound);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.state.snapshot());
                }
                Command::Stats { reply } => {
                    let _ = reply.send(GraphStats {
                        nodes: self.state.node_count(),
                        fields: self.state.field_count(),
                        subscriptions: self.subscriptions.len(),
                        replicas: self.replicas.len(),
                    });
                }
                Command::Shutdown => break,
            }
        }

        info!("Graph replica stopped");
    }

    /// Monotonic merge state for local writes.
    fn tick(&mut self) -> State {
        let now = chrono::Utc::now().timestamp_millis();
        self.clock = now.max(self.clock.saturating_add(1));
        self.clock
    }

    fn put(&mut self, path: Path, value: Value) {
        let state = self.tick();
        let mut deltas = Vec::new();

        for (node, field) in ancestor_links(&path) {
            if !self.state.is_link(&node, &field) {
                deltas.push(Delta {
                    node,
                    field,
                    value: FieldValue::Link,
                    state,
                });
            }
        }

        // deleting a node also clears its fields, so a later write to the
        // same path starts from an empty record
        if value.is_null() {
            for field in self.state.child_keys(&path) {
                deltas.push(Delta {
                    node: path.clone(),
                    field,
                    value: FieldValue::Tombstone,
                    state,
                });
            }
        }

        deltas.extend(flatten(&path, &value, state));
        self.apply(deltas, None);
    }

    fn merge_remote(&mut self, origin: ReplicaId, deltas: Vec<Delta>) {
        let horizon = chrono::Utc::now().timestamp_millis() + MAX_CLOCK_DRIFT_MS;
        let (accepted, rejected): (Vec<Delta>, Vec<Delta>) =
            deltas.into_iter().partition(|d| d.state <= horizon);
        if !rejected.is_empty() {
            warn!(
                replica = origin,
                count = rejected.len(),
                "Dropping deltas stamped in the future"
            );
        }

        if let Some(max) = accepted.iter().map(|d| d.state).max() {
            self.clock = self.clock.max(max);
        }
        self.apply(accepted, Some(origin));
    }

    fn apply(&mut self, deltas: Vec<Delta>, origin: Option<ReplicaId>) {
        let applied: Vec<Delta> = deltas
            .into_iter()
            .filter(|delta| self.state.merge(delta))
            .collect();
        if applied.is_empty() {
            return;
        }

        self.record(&applied);
        self.notify(&applied);
        self.forward(&applied, origin);
    }

    fn record(&self, applied: &[Delta]) {
        let Some(journal) = &self.journal else {
            return;
        };

        let rows: Vec<JournalRow> = applied
            .iter()
            .map(|d| JournalRow {
                path: d.node.segments().to_vec(),
                field: d.field.clone(),
                value: d.value.encode(),
                state: d.state,
            })
            .collect();

        if let Err(e) = journal.record_fields(&rows) {
            warn!(error = %e, "Failed to journal graph writes");
        }
    }

    fn subscribe(
        &mut self,
        id: u64,
        path: Path,
        mode: Mode,
        events: mpsc::UnboundedSender<GraphEvent>,
    ) {
        match mode {
            Mode::Node => {
                if let Some(value) = self.state.resolve(&path) {
                    let _ = events.send(GraphEvent {
                        path: path.clone(),
                        key: path.key().unwrap_or_default().to_string(),
                        value: Some(value),
                    });
                }
            }
            Mode::Map => {
                for key in self.state.child_keys(&path) {
                    let child = path.child(key.clone());
                    if let Some(value) = self.state.resolve(&child) {
                        let _ = events.send(GraphEvent {
                            path: child,
                            key,
                            value: Some(value),
                        });
                    }
                }
            }
        }

        self.subscriptions.insert(id, Subscriber { path, mode, events });
    }

    fn notify(&mut self, applied: &[Delta]) {
        // paths whose own value may have changed
        let mut touched: BTreeSet<Path> = BTreeSet::new();
        // (parent, child key) pairs for map subscribers
        let mut children: BTreeSet<(Path, String)> = BTreeSet::new();

        for d in applied {
            touched.insert(d.node.child(d.field.clone()));
            touched.insert(d.node.clone());
            children.insert((d.node.clone(), d.field.clone()));
            if let (Some(parent), Some(key)) = (d.node.parent(), d.node.key()) {
                children.insert((parent, key.to_string()));
            }
        }

        self.subscriptions.retain(|_, sub| !sub.events.is_closed());
        for sub in self.subscriptions.values() {
            match sub.mode {
                Mode::Node => {
                    if touched.contains(&sub.path) {
                        let _ = sub.events.send(GraphEvent {
                            path: sub.path.clone(),
                            key: sub.path.key().unwrap_or_default().to_string(),
                            value: self.state.resolve(&sub.path),
                        });
                    }
                }
                Mode::Map => {
                    for (parent, key) in &children {
                        if parent != &sub.path {
                            continue;
                        }
                        let child = parent.child(key.clone());
                        let _ = sub.events.send(GraphEvent {
                            value: self.state.resolve(&child),
                            path: child,
                            key: key.clone(),
                        });
                    }
                }
            }
        }

        let waiters = std::mem::take(&mut self.waiters);
        for (path, reply) in waiters {
            if reply.is_closed() {
                continue;
            }
            if touched.contains(&path) {
                if let Some(value) = self.state.resolve(&path) {
                    let _ = reply.send(Some(value));
                    continue;
                }
            }
            self.waiters.push((path, reply));
        }
    }

    fn forward(&mut self, applied: &[Delta], origin: Option<ReplicaId>) {
        self.replicas.retain(|id, outbound| {
            if Some(*id) == origin {
                return true;
            }
            outbound.send(applied.to_vec()).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn next(sub: &mut Subscription) -> GraphEvent {
        tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("event within timeout")
            .expect("replica alive")
    }

    fn graph() -> Graph {
        spawn_graph(GraphConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn on_fires_for_existing_and_future_values() {
        let g = graph();
        let path = Path::new(["~alice", "profile"]);
        g.put(&path, json!({"alias": "alice", "createdAt": 1}));

        let mut sub = g.on(&path);
        let first = next(&mut sub).await;
        assert_eq!(first.value, Some(json!({"alias": "alice", "createdAt": 1})));

        g.put(&path.child("alias"), json!("alice2"));
        let second = next(&mut sub).await;
        assert_eq!(second.value.unwrap()["alias"], json!("alice2"));
    }

    #[tokio::test]
    async fn map_fires_per_child_and_on_delete() {
        let g = graph();
        let inbox = Path::new(["friend_requests", "bob"]);
        g.put(&inbox.child("alice"), json!({"from": "alice", "time": 1}));

        let mut sub = g.map(&inbox);
        let existing = next(&mut sub).await;
        assert_eq!(existing.key, "alice");
        assert!(existing.value.is_some());

        g.put(&inbox.child("carol"), json!({"from": "carol", "time": 2}));
        let added = next(&mut sub).await;
        assert_eq!(added.key, "carol");

        g.delete(&inbox.child("alice"));
        let removed = next(&mut sub).await;
        assert_eq!(removed.key, "alice");
        assert_eq!(removed.value, None);
    }

    #[tokio::test]
    async fn once_times_out_with_none() {
        let g = graph();
        let value = g
            .once(&Path::new(["~nobody"]), Duration::from_millis(50))
            .await;
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn once_resolves_late_value() {
        let g = graph();
        let path = Path::new(["~late", "epub"]);

        let reader = {
            let g = g.clone();
            let path = path.clone();
            tokio::spawn(async move { g.once(&path, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        g.put(&path, json!("abcd"));

        assert_eq!(reader.await.unwrap(), Some(json!("abcd")));
    }

    #[tokio::test]
    async fn rewrite_after_delete_drops_old_fields() {
        let g = graph();
        let slot = Path::new(["voice", "s/v", "signals", "bob", "alice"]);
        g.put(&slot, json!({"type": "offer", "sdp": "v=0", "time": 1}));
        g.delete(&slot);
        g.put(&slot, json!({"type": "ice", "candidate": "c", "time": 2}));

        let value = g.once(&slot, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, json!({"type": "ice", "candidate": "c", "time": 2}));
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let g = graph();
        let keep = g.on(&Path::new(["a"]));
        let gone = g.map(&Path::new(["b"]));
        drop(gone);

        let stats = g.stats().await.unwrap();
        assert_eq!(stats.subscriptions, 1);
        drop(keep);
    }

    #[tokio::test]
    async fn journal_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("graph.db");
        let path = Path::new(["dms", "a::b", "1-abcdef"]);

        let first = spawn_graph(GraphConfig {
            journal: Some(Database::open_at(&db_path).unwrap()),
        })
        .unwrap();
        first.put(&path, json!({"id": "1-abcdef", "time": 1}));
        // round-trip through the task so the write is journalled
        assert!(first.once(&path, Duration::from_secs(1)).await.is_some());
        first.shutdown();

        let second = spawn_graph(GraphConfig {
            journal: Some(Database::open_at(&db_path).unwrap()),
        })
        .unwrap();
        let value = second.once(&path, Duration::from_millis(200)).await;
        assert_eq!(value, Some(json!({"id": "1-abcdef", "time": 1})));
    }
}
