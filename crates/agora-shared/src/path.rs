use serde::{Deserialize, Serialize};

/// Location of a node or field in the replicated graph.
///
/// Segments are opaque: a segment may itself contain `/` (voice channel
/// paths do), so a `Path` is never re-split from its display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Path(Vec<String>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Last segment, i.e. this node's key inside its parent.
    pub fn key(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// True if `self` is `other` or lies beneath it.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_and_parent() {
        let p = Path::new(["servers", "srv-1"]).child("members");
        assert_eq!(p.to_string(), "servers/srv-1/members");
        assert_eq!(p.key(), Some("members"));
        assert_eq!(p.parent(), Some(Path::new(["servers", "srv-1"])));
        assert_eq!(Path::root().parent(), None);
    }

    #[test]
    fn segments_may_contain_slashes() {
        let p = Path::new(["voice", "srv-1/voice-1", "peers"]);
        assert_eq!(p.len(), 3);
        assert!(p.starts_with(&Path::new(["voice", "srv-1/voice-1"])));
        assert!(!p.starts_with(&Path::new(["voice", "srv-1"])));
    }
}
