use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// One extracted tag body: either a leaf string or a mapping of nested tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Tags(TagMap),
}

impl Node {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Node::Text(s) => Some(s),
            Node::Tags(_) => None,
        }
    }

    pub fn as_tags(&self) -> Option<&TagMap> {
        match self {
            Node::Tags(m) => Some(m),
            Node::Text(_) => None,
        }
    }

    /// Look up a nested tag. Always `None` for a leaf.
    pub fn get(&self, tag: &str) -> Option<&Node> {
        self.as_tags().and_then(|m| m.get(tag))
    }

    /// Leaf -> JSON string, mapping -> JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Node::Text(s) => serde_json::Value::String(s.clone()),
            Node::Tags(m) => m.to_json(),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Text(s) => serializer.serialize_str(s),
            Node::Tags(m) => m.serialize(serializer),
        }
    }
}

// ---------------------------------------------------------------------------
// TagMap: nested level, one value per tag name
// ---------------------------------------------------------------------------

/// Nested tags below the top level.
///
/// Keeps first-appearance order of names; a repeated name replaces the earlier
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    entries: Vec<(String, Node)>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, node: Node) {
        let tag = tag.into();
        match self.entries.iter_mut().find(|(k, _)| *k == tag) {
            Some(slot) => slot.1 = node,
            None => self.entries.push((tag, node)),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&Node> {
        self.entries.iter().find(|(k, _)| k == tag).map(|(_, v)| v)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let obj = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(obj)
    }
}

impl Serialize for TagMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// TagTree: top level, every occurrence kept
// ---------------------------------------------------------------------------

/// Top-level extraction result: lower-cased tag name -> every occurrence, in
/// document order.
///
/// Tag names are listed in order of first appearance, which is also the order
/// handlers are dispatched in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagTree {
    entries: Vec<(String, Vec<Node>)>,
}

impl TagTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one occurrence of `tag`.
    pub fn push(&mut self, tag: impl Into<String>, node: Node) {
        let tag = tag.into();
        match self.entries.iter_mut().find(|(k, _)| *k == tag) {
            Some(slot) => slot.1.push(node),
            None => self.entries.push((tag, vec![node])),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&[Node]> {
        self.entries
            .iter()
            .find(|(k, _)| k == tag)
            .map(|(_, v)| v.as_slice())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Node])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct tag names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let obj = self
            .entries
            .iter()
            .map(|(k, nodes)| {
                let list = nodes.iter().map(Node::to_json).collect();
                (k.clone(), serde_json::Value::Array(list))
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(obj)
    }
}

impl Serialize for TagTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl IntoIterator for TagTree {
    type Item = (String, Vec<Node>);
    type IntoIter = std::vec::IntoIter<(String, Vec<Node>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
