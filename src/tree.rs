//! Backing config tree boundary
//!
//! The replicated merge engine that ships conversation data between a user's
//! devices is an external collaborator; this store only needs an ordered
//! nested dictionary with typed leaves and a commit sequence. `ConfigTree`
//! captures exactly that surface, and `MemoryTree` is the ordered in-memory
//! implementation used by default (and by tests).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

/// A single node in the backing tree: an ordered dict, or a scalar leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Dict(BTreeMap<Vec<u8>, Node>),
    Int(i64),
    Bytes(Vec<u8>),
}

impl Node {
    pub fn dict(&self) -> Option<&BTreeMap<Vec<u8>, Node>> {
        match self {
            Node::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn integer(&self) -> Option<i64> {
        match self {
            Node::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Node::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// The operations the store needs from its backing tree.
///
/// Paths are sequences of dict keys from the root. Writes create intermediate
/// dicts as needed (replacing a scalar found along the way); removal prunes
/// dict parents left empty, so an "entry" ceases to exist the moment its last
/// field does.
pub trait ConfigTree {
    /// Typed view of the node at `path`, or None if nothing is stored there.
    fn node(&self, path: &[&[u8]]) -> Option<&Node>;

    fn set_int(&mut self, path: &[&[u8]], value: i64);

    fn set_bytes(&mut self, path: &[&[u8]], value: &[u8]);

    /// Remove the node at `path`. Returns true if it existed.
    fn remove(&mut self, path: &[&[u8]]) -> bool;

    /// First key of the dict at `path`, in the tree's native (lexicographic)
    /// byte order.
    fn first_key(&self, path: &[&[u8]]) -> Option<Vec<u8>>;

    /// First key strictly greater than `after` in the dict at `path`.
    ///
    /// Key-based stepping keeps cursor positions valid across removal of the
    /// key being stepped from.
    fn next_key(&self, path: &[&[u8]], after: &[u8]) -> Option<Vec<u8>>;

    /// Produce the payload to publish and bump the commit sequence if the
    /// tree changed since the last push.
    fn push(&mut self) -> (Vec<u8>, u64);

    /// Serialized snapshot suitable for a later resume.
    fn dump(&self) -> Vec<u8>;

    fn exists(&self, path: &[&[u8]]) -> bool {
        self.node(path).is_some()
    }

    fn int_at(&self, path: &[&[u8]]) -> Option<i64> {
        self.node(path).and_then(Node::integer)
    }

    fn bytes_at(&self, path: &[&[u8]]) -> Option<&[u8]> {
        self.node(path).and_then(Node::bytes)
    }

    fn dict_len(&self, path: &[&[u8]]) -> usize {
        self.node(path).and_then(Node::dict).map_or(0, BTreeMap::len)
    }
}

/// Ordered in-memory backing tree with a CBOR dump format.
#[derive(Default)]
pub struct MemoryTree {
    root: BTreeMap<Vec<u8>, Node>,
    seq: u64,
    dirty: bool,
}

#[derive(Serialize)]
struct DumpRef<'a> {
    seq: u64,
    root: &'a BTreeMap<Vec<u8>, Node>,
}

#[derive(Deserialize)]
struct DumpOwned {
    seq: u64,
    root: BTreeMap<Vec<u8>, Node>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a prior [`ConfigTree::dump`] payload.
    pub fn from_dump(dump: &[u8]) -> Result<Self, crate::error::ConvoError> {
        let DumpOwned { seq, root } = ciborium::de::from_reader(dump)
            .map_err(|e| crate::error::ConvoError::BadDump(e.to_string()))?;
        Ok(Self {
            root,
            seq,
            dirty: false,
        })
    }

    /// Current commit sequence.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether there are changes not yet covered by a push.
    pub fn needs_push(&self) -> bool {
        self.dirty
    }

    fn descend(&self, path: &[&[u8]]) -> Option<&Node> {
        let (head, rest) = path.split_first()?;
        let mut node = self.root.get(*head)?;
        for key in rest {
            node = node.dict()?.get(*key)?;
        }
        Some(node)
    }

    /// Walk to the dict that should hold the final path segment, creating
    /// intermediate dicts (and replacing scalars) along the way.
    fn dict_for_mut(&mut self, path: &[&[u8]]) -> (&mut BTreeMap<Vec<u8>, Node>, Vec<u8>) {
        let (last, parents) = path.split_last().expect("path must be non-empty");
        let mut dict = &mut self.root;
        for key in parents {
            let entry = dict
                .entry(key.to_vec())
                .or_insert_with(|| Node::Dict(BTreeMap::new()));
            if !matches!(entry, Node::Dict(_)) {
                *entry = Node::Dict(BTreeMap::new());
            }
            dict = match entry {
                Node::Dict(d) => d,
                _ => unreachable!(),
            };
        }
        (dict, last.to_vec())
    }

    fn remove_in(dict: &mut BTreeMap<Vec<u8>, Node>, path: &[&[u8]]) -> bool {
        let (head, rest) = match path.split_first() {
            Some(split) => split,
            None => return false,
        };
        if rest.is_empty() {
            return dict.remove(*head).is_some();
        }
        let removed = match dict.get_mut(*head) {
            Some(Node::Dict(child)) => Self::remove_in(child, rest),
            _ => false,
        };
        if removed {
            // Prune dict parents left empty.
            if matches!(dict.get(*head), Some(Node::Dict(d)) if d.is_empty()) {
                dict.remove(*head);
            }
        }
        removed
    }
}

impl ConfigTree for MemoryTree {
    fn node(&self, path: &[&[u8]]) -> Option<&Node> {
        self.descend(path)
    }

    fn set_int(&mut self, path: &[&[u8]], value: i64) {
        let (dict, key) = self.dict_for_mut(path);
        dict.insert(key, Node::Int(value));
        self.dirty = true;
    }

    fn set_bytes(&mut self, path: &[&[u8]], value: &[u8]) {
        let (dict, key) = self.dict_for_mut(path);
        dict.insert(key, Node::Bytes(value.to_vec()));
        self.dirty = true;
    }

    fn remove(&mut self, path: &[&[u8]]) -> bool {
        let removed = Self::remove_in(&mut self.root, path);
        if removed {
            self.dirty = true;
        }
        removed
    }

    fn first_key(&self, path: &[&[u8]]) -> Option<Vec<u8>> {
        let dict = if path.is_empty() {
            &self.root
        } else {
            self.descend(path)?.dict()?
        };
        dict.keys().next().cloned()
    }

    fn next_key(&self, path: &[&[u8]], after: &[u8]) -> Option<Vec<u8>> {
        let dict = if path.is_empty() {
            &self.root
        } else {
            self.descend(path)?.dict()?
        };
        dict.range::<[u8], _>((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    fn push(&mut self) -> (Vec<u8>, u64) {
        if self.dirty {
            self.seq += 1;
            self.dirty = false;
        }
        let mut buf = Vec::new();
        if let Err(e) = ciborium::ser::into_writer(&self.root, &mut buf) {
            log::warn!("Failed to serialize push payload: {e}");
            buf.clear();
        }
        (buf, self.seq)
    }

    fn dump(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let snapshot = DumpRef {
            seq: self.seq,
            root: &self.root,
        };
        if let Err(e) = ciborium::ser::into_writer(&snapshot, &mut buf) {
            log::warn!("Failed to serialize dump: {e}");
            buf.clear();
        }
        buf
    }
}
