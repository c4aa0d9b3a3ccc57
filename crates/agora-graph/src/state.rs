//! In-memory graph state with field-level last-write-wins merge.
//!
//! A node is addressed by its [`Path`] and holds named fields. A field is a
//! JSON scalar, a link to the child node of the same name, or a tombstone.
//! Each field carries the state (a millisecond clock) it was written at; the
//! highest state wins, ties are broken by comparing the values so every
//! replica converges on the same result regardless of delivery order.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agora_shared::Path;

pub type State = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// JSON text of a non-object, non-null value.
    Scalar(String),
    /// The field names a child node.
    Link,
    /// Deleted. Masks anything older written beneath it.
    Tombstone,
}

impl FieldValue {
    fn scalar(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Tombstone,
            other => FieldValue::Scalar(other.to_string()),
        }
    }

    fn tie_rank(&self) -> (u8, &str) {
        match self {
            FieldValue::Tombstone => (0, ""),
            FieldValue::Link => (1, ""),
            FieldValue::Scalar(text) => (2, text.as_str()),
        }
    }

    /// Journal encoding.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// A single field write, the unit of merge and replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub node: Path,
    pub field: String,
    pub value: FieldValue,
    pub state: State,
}

#[derive(Debug, Clone)]
struct Entry {
    value: FieldValue,
    state: State,
}

#[derive(Default)]
pub struct GraphState {
    nodes: HashMap<Path, BTreeMap<String, Entry>>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one delta. Returns `true` if it replaced the current field.
    pub fn merge(&mut self, delta: &Delta) -> bool {
        let node = self.nodes.entry(delta.node.clone()).or_default();
        if let Some(current) = node.get(&delta.field) {
            let newer = delta.state > current.state
                || (delta.state == current.state
                    && delta.value.tie_rank() > current.value.tie_rank());
            if !newer {
                return false;
            }
        }
        node.insert(
            delta.field.clone(),
            Entry {
                value: delta.value.clone(),
                state: delta.state,
            },
        );
        true
    }

    pub fn is_link(&self, node: &Path, field: &str) -> bool {
        self.nodes
            .get(node)
            .and_then(|fields| fields.get(field))
            .map_or(false, |entry| entry.value == FieldValue::Link)
    }

    /// Current value at `path`: a scalar, a shallow object of the node's
    /// scalar fields, or `None` if absent or deleted.
    pub fn resolve(&self, path: &Path) -> Option<Value> {
        let (parent, key) = match (path.parent(), path.key()) {
            (Some(parent), Some(key)) => (parent, key),
            _ => return self.node_object(path, State::MIN),
        };

        let entry = self.nodes.get(&parent).and_then(|fields| fields.get(key));
        match entry {
            Some(Entry {
                value: FieldValue::Scalar(text),
                ..
            }) => serde_json::from_str(text).ok(),
            Some(Entry {
                value: FieldValue::Tombstone,
                state,
            }) => self.node_object(path, *state),
            _ => self.node_object(path, State::MIN),
        }
    }

    fn node_object(&self, path: &Path, newer_than: State) -> Option<Value> {
        let fields = self.nodes.get(path)?;
        let mut object = Map::new();
        let mut live = false;

        for (name, entry) in fields {
            if entry.state <= newer_than {
                continue;
            }
            match &entry.value {
                FieldValue::Scalar(text) => {
                    if let Ok(value) = serde_json::from_str(text) {
                        object.insert(name.clone(), value);
                        live = true;
                    }
                }
                FieldValue::Link => live = true,
                FieldValue::Tombstone => {}
            }
        }

        live.then_some(Value::Object(object))
    }

    /// Field names of the node at `path`, in key order.
    pub fn child_keys(&self, path: &Path) -> Vec<String> {
        self.nodes
            .get(path)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every field as a delta, for full-state exchange.
    pub fn snapshot(&self) -> Vec<Delta> {
        let mut deltas: Vec<Delta> = self
            .nodes
            .iter()
            .flat_map(|(node, fields)| {
                fields.iter().map(move |(field, entry)| Delta {
                    node: node.clone(),
                    field: field.clone(),
                    value: entry.value.clone(),
                    state: entry.state,
                })
            })
            .collect();
        deltas.sort_by_key(|d| d.state);
        deltas
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn field_count(&self) -> usize {
        self.nodes.values().map(BTreeMap::len).sum()
    }
}

/// Break a `put(path, value)` into field deltas. Objects become a link plus
/// one delta per nested field; `null` becomes a tombstone.
pub fn flatten(path: &Path, value: &Value, state: State) -> Vec<Delta> {
    let mut out = Vec::new();

    match (path.parent(), path.key()) {
        (Some(parent), Some(key)) => match value {
            Value::Object(map) => {
                out.push(Delta {
                    node: parent,
                    field: key.to_string(),
                    value: FieldValue::Link,
                    state,
                });
                flatten_object(path, map, state, &mut out);
            }
            other => out.push(Delta {
                node: parent,
                field: key.to_string(),
                value: FieldValue::scalar(other),
                state,
            }),
        },
        // only objects can be written at the root
        _ => {
            if let Value::Object(map) = value {
                flatten_object(path, map, state, &mut out);
            }
        }
    }

    out
}

fn flatten_object(node: &Path, map: &Map<String, Value>, state: State, out: &mut Vec<Delta>) {
    for (field, value) in map {
        match value {
            Value::Object(inner) => {
                out.push(Delta {
                    node: node.clone(),
                    field: field.clone(),
                    value: FieldValue::Link,
                    state,
                });
                flatten_object(&node.child(field.clone()), inner, state, out);
            }
            other => out.push(Delta {
                node: node.clone(),
                field: field.clone(),
                value: FieldValue::scalar(other),
                state,
            }),
        }
    }
}

/// `(node, field)` pairs linking the root down to `path`'s parent.
pub fn ancestor_links(path: &Path) -> Vec<(Path, String)> {
    let segments = path.segments();
    (0..segments.len().saturating_sub(1))
        .map(|i| {
            (
                Path::new(segments[..i].iter().cloned()),
                segments[i].clone(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(state: &mut GraphState, path: &Path, value: Value, at: State) {
        for delta in flatten(path, &value, at) {
            state.merge(&delta);
        }
    }

    #[test]
    fn last_write_wins_per_field() {
        let mut g = GraphState::new();
        let p = Path::new(["friends", "bob"]);

        apply(&mut g, &p, json!({"alias": "bob", "addedAt": 1}), 10);
        apply(&mut g, &p, json!({"alias": "robert"}), 20);
        apply(&mut g, &p, json!({"alias": "stale"}), 15);

        assert_eq!(g.resolve(&p), Some(json!({"alias": "robert", "addedAt": 1})));
    }

    #[test]
    fn tie_break_is_order_independent() {
        let p = Path::new(["k"]);
        let a = flatten(&p, &json!("apple"), 5);
        let b = flatten(&p, &json!("banana"), 5);

        let mut left = GraphState::new();
        left.merge(&a[0]);
        left.merge(&b[0]);
        let mut right = GraphState::new();
        right.merge(&b[0]);
        right.merge(&a[0]);

        assert_eq!(left.resolve(&p), right.resolve(&p));
    }

    #[test]
    fn tombstone_masks_older_fields() {
        let mut g = GraphState::new();
        let req = Path::new(["friend_requests", "me", "bob"]);

        apply(&mut g, &req, json!({"from": "bob", "time": 1}), 10);
        apply(&mut g, &req, Value::Null, 20);
        assert_eq!(g.resolve(&req), None);

        // a field written before the delete but delivered after it stays hidden
        g.merge(&Delta {
            node: req.clone(),
            field: "alias".into(),
            value: FieldValue::Scalar("\"bob\"".into()),
            state: 15,
        });
        assert_eq!(g.resolve(&req), None);

        // a newer field is visible again
        g.merge(&Delta {
            node: req.clone(),
            field: "time".into(),
            value: FieldValue::Scalar("2".into()),
            state: 30,
        });
        assert_eq!(g.resolve(&req), Some(json!({"time": 2})));
    }

    #[test]
    fn nested_objects_become_linked_nodes() {
        let mut g = GraphState::new();
        let srv = Path::new(["servers", "s1"]);
        apply(
            &mut g,
            &srv,
            json!({"name": "club", "channels": {"general": {"name": "general", "type": "text"}}}),
            1,
        );

        assert!(g.is_link(&srv, "channels"));
        // shallow: linked children are not inlined
        assert_eq!(g.resolve(&srv), Some(json!({"name": "club"})));
        assert_eq!(
            g.resolve(&srv.child("channels").child("general")),
            Some(json!({"name": "general", "type": "text"}))
        );
        assert_eq!(g.child_keys(&srv.child("channels")), vec!["general"]);
    }

    #[test]
    fn ancestor_links_cover_every_level() {
        let links = ancestor_links(&Path::new(["a", "b", "c", "d"]));
        assert_eq!(
            links,
            vec![
                (Path::root(), "a".to_string()),
                (Path::new(["a"]), "b".to_string()),
                (Path::new(["a", "b"]), "c".to_string()),
            ]
        );
    }

    #[test]
    fn field_value_encoding_is_stable() {
        for value in [
            FieldValue::Link,
            FieldValue::Tombstone,
            FieldValue::Scalar("\"x\"".into()),
        ] {
            assert_eq!(FieldValue::decode(&value.encode()), Some(value));
        }
    }
}
