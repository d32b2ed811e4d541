//! Conversation store façade
//!
//! Maps conversation variants onto the backing tree's keying scheme and
//! applies the retention policy on writes and publishes. Tree layout:
//!
//! ```text
//!   "1" -> { <33-byte session id> -> { "r": last_read, "u": 1 } }
//!   "o" -> { <base url> -> { "#": <32-byte pubkey>,
//!                            "R": { <room token> -> { "r": ..., "u": 1 } } } }
//!   "C" -> { <33-byte group id> -> { "r": last_read, "u": 1 } }
//! ```

use chrono::Utc;
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

use crate::canonical::{canonical_room, canonical_url, session_id_to_bytes};
use crate::convo::{Community, Conversation, LegacyGroup, OneToOne, KEY_LAST_READ, KEY_UNREAD};
use crate::error::ConvoError;
use crate::retention::RetentionPolicy;
use crate::tree::{ConfigTree, MemoryTree, Node};

/// Top-level section for 1-to-1 conversations.
pub(crate) const SECTION_ONE_TO_ONE: &[u8] = b"1";

/// Top-level section for community servers.
pub(crate) const SECTION_COMMUNITY: &[u8] = b"o";

/// Top-level section for legacy closed groups.
pub(crate) const SECTION_LEGACY: &[u8] = b"C";

/// Server-level pubkey field, shared by all rooms under one base URL.
pub(crate) const KEY_SERVER_PUBKEY: &[u8] = b"#";

/// Server-level rooms sub-collection.
pub(crate) const KEY_ROOMS: &[u8] = b"R";

/// Per-device ephemeral read-state for every conversation, backed by a
/// convergent config tree shared across the user's devices.
pub struct ConvoStore<T: ConfigTree = MemoryTree> {
    tree: T,
    policy: RetentionPolicy,
    signing_key: SigningKey,
}

impl ConvoStore<MemoryTree> {
    /// Construct over the default in-memory tree.
    ///
    /// `ed25519_secretkey` is the 32-byte seed, or a 64-byte libsodium-style
    /// secret key of which the first 32 bytes are the seed. It is held for
    /// the backing tree's own authentication and is otherwise opaque to this
    /// layer. `dump` resumes from a prior [`ConvoStore::dump`] payload.
    pub fn new(ed25519_secretkey: &[u8], dump: Option<&[u8]>) -> Result<Self, ConvoError> {
        let tree = match dump {
            Some(d) => MemoryTree::from_dump(d)?,
            None => MemoryTree::new(),
        };
        Self::with_backing(tree, RetentionPolicy::default(), ed25519_secretkey)
    }
}

impl<T: ConfigTree> ConvoStore<T> {
    /// Construct over an arbitrary backing tree with an explicit policy.
    pub fn with_backing(
        tree: T,
        policy: RetentionPolicy,
        ed25519_secretkey: &[u8],
    ) -> Result<Self, ConvoError> {
        if ed25519_secretkey.len() != 32 && ed25519_secretkey.len() != 64 {
            return Err(ConvoError::InvalidKeyMaterial(format!(
                "expected a 32-byte seed or 64-byte secret key, got {} bytes",
                ed25519_secretkey.len()
            )));
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&ed25519_secretkey[..32]);
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(Self {
            tree,
            policy,
            signing_key,
        })
    }

    /// The key the backing tree authenticates with; opaque to this layer.
    pub fn signer(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    // --- 1-to-1 ---

    pub fn get_one_to_one(&self, session_id: &str) -> Result<Option<OneToOne>, ConvoError> {
        let mut c = OneToOne::new(session_id)?;
        match self.tree.node(&[SECTION_ONE_TO_ONE, &c.key()]) {
            Some(node @ Node::Dict(_)) => {
                c.load(node);
                Ok(Some(c))
            }
            _ => Ok(None),
        }
    }

    /// Like `get_one_to_one`, but a missing entry comes back zero-valued
    /// instead of `None`. Never writes.
    pub fn get_or_construct_one_to_one(&self, session_id: &str) -> Result<OneToOne, ConvoError> {
        let mut c = OneToOne::new(session_id)?;
        if let Some(node) = self.tree.node(&[SECTION_ONE_TO_ONE, &c.key()]) {
            c.load(node);
        }
        Ok(c)
    }

    pub fn set_one_to_one(&mut self, c: &OneToOne) {
        self.set_one_to_one_at(c, Self::now_ms());
    }

    /// Clock-injected variant of [`ConvoStore::set_one_to_one`].
    pub fn set_one_to_one_at(&mut self, c: &OneToOne, now_ms: i64) {
        let key = c.key();
        self.write_read_state(&[SECTION_ONE_TO_ONE, &key], c.last_read, c.unread, now_ms);
    }

    pub fn erase_one_to_one(&mut self, session_id: &str) -> Result<bool, ConvoError> {
        let key = session_id_to_bytes(session_id)?;
        Ok(self.tree.remove(&[SECTION_ONE_TO_ONE, &key]))
    }

    pub fn size_one_to_one(&self) -> usize {
        self.tree.dict_len(&[SECTION_ONE_TO_ONE])
    }

    // --- communities ---

    /// Look up a community room by its logical identity (base_url, room).
    /// The pubkey comes from the stored server entry; a server without one
    /// does not exist as far as this store is concerned.
    pub fn get_community(&self, base_url: &str, room: &str) -> Result<Option<Community>, ConvoError> {
        let url = canonical_url(base_url)?;
        let room = canonical_room(room)?;
        let server_pk = self
            .tree
            .bytes_at(&[SECTION_COMMUNITY, url.as_bytes(), KEY_SERVER_PUBKEY]);
        let pubkey: [u8; 32] = match server_pk.map(TryInto::try_into) {
            Some(Ok(pk)) => pk,
            // Missing or structurally-wrong pubkey: treat as nonexistent.
            _ => return Ok(None),
        };
        match self
            .tree
            .node(&[SECTION_COMMUNITY, url.as_bytes(), KEY_ROOMS, room.as_bytes()])
        {
            Some(node @ Node::Dict(_)) => {
                let mut c = Community {
                    base_url: url,
                    room,
                    pubkey,
                    last_read: 0,
                    unread: false,
                };
                c.load(node);
                Ok(Some(c))
            }
            _ => Ok(None),
        }
    }

    /// Like `get_community`, but a missing entry comes back zero-valued with
    /// the supplied pubkey. Never writes.
    pub fn get_or_construct_community(
        &self,
        base_url: &str,
        room: &str,
        pubkey: &[u8],
    ) -> Result<Community, ConvoError> {
        let mut c = Community::new(base_url, room, pubkey)?;
        if let Some(node) = self.tree.node(&[
            SECTION_COMMUNITY,
            c.base_url.as_bytes(),
            KEY_ROOMS,
            c.room.as_bytes(),
        ]) {
            c.load(node);
        }
        Ok(c)
    }

    pub fn set_community(&mut self, c: &Community) {
        self.set_community_at(c, Self::now_ms());
    }

    /// Clock-injected variant of [`ConvoStore::set_community`].
    pub fn set_community_at(&mut self, c: &Community, now_ms: i64) {
        // The pubkey is server identity, not per-room identity; rewrite it on
        // every set so all rooms under this base URL agree.
        self.tree.set_bytes(
            &[SECTION_COMMUNITY, c.base_url.as_bytes(), KEY_SERVER_PUBKEY],
            &c.pubkey,
        );
        self.write_read_state(
            &[
                SECTION_COMMUNITY,
                c.base_url.as_bytes(),
                KEY_ROOMS,
                c.room.as_bytes(),
            ],
            c.last_read,
            c.unread,
            now_ms,
        );
    }

    pub fn erase_community(&mut self, base_url: &str, room: &str) -> Result<bool, ConvoError> {
        let url = canonical_url(base_url)?;
        let room = canonical_room(room)?;
        Ok(self.erase_community_key(url.as_bytes(), room.as_bytes()))
    }

    pub(crate) fn erase_community_key(&mut self, server: &[u8], room: &[u8]) -> bool {
        let found = self
            .tree
            .remove(&[SECTION_COMMUNITY, server, KEY_ROOMS, room]);
        // A server left without rooms carries no conversation state; drop it
        // along with its pubkey.
        if found && self.tree.dict_len(&[SECTION_COMMUNITY, server, KEY_ROOMS]) == 0 {
            self.tree.remove(&[SECTION_COMMUNITY, server]);
        }
        found
    }

    /// Number of community rooms, counting only servers with a recorded
    /// pubkey (matching what iteration yields).
    pub fn size_communities(&self) -> usize {
        let mut n = 0;
        let mut key = self.tree.first_key(&[SECTION_COMMUNITY]);
        while let Some(server) = key {
            let pk = self
                .tree
                .bytes_at(&[SECTION_COMMUNITY, &server, KEY_SERVER_PUBKEY]);
            if matches!(pk, Some(pk) if pk.len() == 32) {
                n += self.tree.dict_len(&[SECTION_COMMUNITY, &server, KEY_ROOMS]);
            }
            key = self.tree.next_key(&[SECTION_COMMUNITY], &server);
        }
        n
    }

    // --- legacy closed groups ---

    pub fn get_legacy_group(&self, id: &str) -> Result<Option<LegacyGroup>, ConvoError> {
        let mut c = LegacyGroup::new(id)?;
        match self.tree.node(&[SECTION_LEGACY, &c.key()]) {
            Some(node @ Node::Dict(_)) => {
                c.load(node);
                Ok(Some(c))
            }
            _ => Ok(None),
        }
    }

    pub fn get_or_construct_legacy_group(&self, id: &str) -> Result<LegacyGroup, ConvoError> {
        let mut c = LegacyGroup::new(id)?;
        if let Some(node) = self.tree.node(&[SECTION_LEGACY, &c.key()]) {
            c.load(node);
        }
        Ok(c)
    }

    pub fn set_legacy_group(&mut self, c: &LegacyGroup) {
        self.set_legacy_group_at(c, Self::now_ms());
    }

    /// Clock-injected variant of [`ConvoStore::set_legacy_group`].
    pub fn set_legacy_group_at(&mut self, c: &LegacyGroup, now_ms: i64) {
        let key = c.key();
        self.write_read_state(&[SECTION_LEGACY, &key], c.last_read, c.unread, now_ms);
    }

    pub fn erase_legacy_group(&mut self, id: &str) -> Result<bool, ConvoError> {
        let key = session_id_to_bytes(id)?;
        Ok(self.tree.remove(&[SECTION_LEGACY, &key]))
    }

    pub fn size_legacy_groups(&self) -> usize {
        self.tree.dict_len(&[SECTION_LEGACY])
    }

    // --- any kind ---

    pub fn set(&mut self, convo: &Conversation) {
        self.set_at(convo, Self::now_ms());
    }

    pub fn set_at(&mut self, convo: &Conversation, now_ms: i64) {
        match convo {
            Conversation::OneToOne(c) => self.set_one_to_one_at(c, now_ms),
            Conversation::Community(c) => self.set_community_at(c, now_ms),
            Conversation::LegacyGroup(c) => self.set_legacy_group_at(c, now_ms),
        }
    }

    /// Erase a conversation's backing node. Identities inside a
    /// [`Conversation`] are canonical already, so no validation can fail.
    pub fn erase(&mut self, convo: &Conversation) -> bool {
        match convo {
            Conversation::OneToOne(c) => self.tree.remove(&[SECTION_ONE_TO_ONE, &c.key()]),
            Conversation::Community(c) => {
                self.erase_community_key(c.base_url.as_bytes(), c.room.as_bytes())
            }
            Conversation::LegacyGroup(c) => self.tree.remove(&[SECTION_LEGACY, &c.key()]),
        }
    }

    pub fn size(&self) -> usize {
        self.size_one_to_one() + self.size_communities() + self.size_legacy_groups()
    }

    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    // --- publish ---

    /// Prune expired read entries, then delegate to the backing tree's own
    /// push. Returns the payload to publish and the commit sequence.
    pub fn push(&mut self) -> (Vec<u8>, u64) {
        self.push_at(Self::now_ms())
    }

    /// Clock-injected variant of [`ConvoStore::push`]. The prune scan runs as
    /// one uninterrupted pass over all three sections before the tree push.
    pub fn push_at(&mut self, now_ms: i64) -> (Vec<u8>, u64) {
        let mut cur = self.cursor();
        while !cur.done() {
            let prune = cur
                .current()
                .is_some_and(|c| self.policy.prune_on_publish(c.last_read(), c.unread(), now_ms));
            if prune {
                log::debug!("Pruning expired conversation read-state entry");
                cur = self.erase_at(cur);
            } else {
                cur.advance(self);
            }
        }
        self.tree.push()
    }

    pub fn dump(&self) -> Vec<u8> {
        self.tree.dump()
    }

    /// Write the read-state fields of one conversation node, routing
    /// `last_read` through the retention policy. The unread flag is stored
    /// as 1 when set and removed entirely when cleared, so absence means
    /// "not unread". A node that ends up with no fields is never created
    /// (and is pruned if emptied).
    fn write_read_state(&mut self, node_path: &[&[u8]], last_read: i64, unread: bool, now_ms: i64) {
        let mut path: Vec<&[u8]> = node_path.to_vec();

        path.push(KEY_LAST_READ);
        let stored = self.tree.int_at(&path);
        if self.policy.keep_on_write(stored, last_read, now_ms) {
            self.tree.set_int(&path, last_read);
        } else {
            log::debug!("Dropping stale last_read update ({last_read})");
        }

        path.pop();
        path.push(KEY_UNREAD);
        if unread {
            self.tree.set_int(&path, 1);
        } else {
            self.tree.remove(&path);
        }
    }
}
