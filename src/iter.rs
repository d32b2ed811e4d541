//! Unified conversation cursor
//!
//! Walks all three sections in a fixed order: 1-to-1 conversations, then
//! community rooms (grouped by server, both levels in byte order), then
//! legacy groups. Positions are dict keys rather than borrowed handles, so a
//! cursor stays valid while entries before or at it are erased.
//!
//! Entries that do not look like conversations are skipped, not surfaced:
//! other (possibly newer) config writers may store keys this version does not
//! understand.

use crate::canonical::SESSION_ID_PREFIX;
use crate::convo::{Community, Conversation, LegacyGroup, OneToOne};
use crate::store::{
    ConvoStore, KEY_ROOMS, KEY_SERVER_PUBKEY, SECTION_COMMUNITY, SECTION_LEGACY, SECTION_ONE_TO_ONE,
};
use crate::tree::{ConfigTree, Node};

/// A resumable position in the unified conversation order.
///
/// Equality compares positions only, so a cursor can be checked against one
/// obtained fresh from the store regardless of the loaded value.
///
/// Session-style keys are only surfaced when their leading byte is 0x05.
/// This is stricter than [`crate::canonical::check_session_id`], which
/// accepts any 66-hex id: an id that constructs fine but lacks the prefix is
/// stored and retrievable directly, yet skipped during iteration.
#[derive(Clone, Debug)]
pub struct ConvoCursor {
    pos_one_to_one: Option<Vec<u8>>,
    pos_server: Option<Vec<u8>>,
    pos_room: Option<Vec<u8>>,
    pos_legacy: Option<Vec<u8>>,
    val: Option<Conversation>,
}

impl PartialEq for ConvoCursor {
    fn eq(&self, other: &Self) -> bool {
        self.pos_one_to_one == other.pos_one_to_one
            && self.pos_server == other.pos_server
            && self.pos_room == other.pos_room
            && self.pos_legacy == other.pos_legacy
    }
}

impl Eq for ConvoCursor {}

impl ConvoCursor {
    fn start<T: ConfigTree>(tree: &T, one_to_one: bool, communities: bool, legacy: bool) -> Self {
        let mut cur = Self {
            pos_one_to_one: one_to_one
                .then(|| tree.first_key(&[SECTION_ONE_TO_ONE]))
                .flatten(),
            pos_server: communities
                .then(|| tree.first_key(&[SECTION_COMMUNITY]))
                .flatten(),
            pos_room: None,
            pos_legacy: legacy.then(|| tree.first_key(&[SECTION_LEGACY])).flatten(),
            val: None,
        };
        cur.scan(tree);
        cur
    }

    /// Past the last conversation (also true for an empty store).
    pub fn done(&self) -> bool {
        self.pos_one_to_one.is_none()
            && self.pos_server.is_none()
            && self.pos_room.is_none()
            && self.pos_legacy.is_none()
    }

    /// The conversation at the cursor, or None when [`ConvoCursor::done`].
    pub fn current(&self) -> Option<&Conversation> {
        self.val.as_ref()
    }

    /// Step to the next conversation in order.
    pub fn advance<T: ConfigTree>(&mut self, store: &ConvoStore<T>) {
        self.bump(store.tree());
        self.scan(store.tree());
    }

    /// Move the shallowest active position past its current key. When a
    /// server runs out of rooms its own position advances too, so a None
    /// room position always means "server not yet entered".
    fn bump<T: ConfigTree>(&mut self, tree: &T) {
        if let Some(key) = self.pos_one_to_one.take() {
            self.pos_one_to_one = tree.next_key(&[SECTION_ONE_TO_ONE], &key);
            return;
        }
        if let Some(server) = self.pos_server.take() {
            if let Some(room) = self.pos_room.take() {
                match tree.next_key(&[SECTION_COMMUNITY, &server, KEY_ROOMS], &room) {
                    Some(next) => {
                        self.pos_room = Some(next);
                        self.pos_server = Some(server);
                    }
                    None => self.pos_server = tree.next_key(&[SECTION_COMMUNITY], &server),
                }
            } else {
                self.pos_server = tree.next_key(&[SECTION_COMMUNITY], &server);
            }
            return;
        }
        if let Some(key) = self.pos_legacy.take() {
            self.pos_legacy = tree.next_key(&[SECTION_LEGACY], &key);
        }
    }

    /// From the current positions, settle on the next entry that decodes as a
    /// conversation, skipping anything malformed.
    fn scan<T: ConfigTree>(&mut self, tree: &T) {
        while let Some(key) = self.pos_one_to_one.take() {
            if let Some(node) = session_like_node(tree, SECTION_ONE_TO_ONE, &key) {
                let mut c = OneToOne::from_key(&key);
                c.load(node);
                self.val = Some(c.into());
                self.pos_one_to_one = Some(key);
                return;
            }
            self.pos_one_to_one = tree.next_key(&[SECTION_ONE_TO_ONE], &key);
        }

        while let Some(server) = self.pos_server.take() {
            if self.scan_server(tree, &server) {
                self.pos_server = Some(server);
                return;
            }
            self.pos_room = None;
            self.pos_server = tree.next_key(&[SECTION_COMMUNITY], &server);
        }

        while let Some(key) = self.pos_legacy.take() {
            if let Some(node) = session_like_node(tree, SECTION_LEGACY, &key) {
                let mut c = LegacyGroup::from_key(&key);
                c.load(node);
                self.val = Some(c.into());
                self.pos_legacy = Some(key);
                return;
            }
            self.pos_legacy = tree.next_key(&[SECTION_LEGACY], &key);
        }

        self.val = None;
    }

    /// Scan within one server's room list. Returns true if the cursor settled
    /// on a room of this server.
    fn scan_server<T: ConfigTree>(&mut self, tree: &T, server: &[u8]) -> bool {
        // A server entry without a well-formed pubkey is not usable; skip all
        // of its rooms.
        let pubkey: [u8; 32] = match tree
            .bytes_at(&[SECTION_COMMUNITY, server, KEY_SERVER_PUBKEY])
            .map(TryInto::try_into)
        {
            Some(Ok(pk)) => pk,
            _ => return false,
        };
        if self.pos_room.is_none() {
            self.pos_room = tree.first_key(&[SECTION_COMMUNITY, server, KEY_ROOMS]);
        }
        while let Some(room) = self.pos_room.take() {
            if let Some(node @ Node::Dict(_)) =
                tree.node(&[SECTION_COMMUNITY, server, KEY_ROOMS, &room])
            {
                match assemble_community(server, &room, pubkey) {
                    Some(mut c) => {
                        c.load(node);
                        self.val = Some(c.into());
                        self.pos_room = Some(room);
                        return true;
                    }
                    None => log::warn!("Skipping community room entry with malformed identity"),
                }
            }
            self.pos_room = tree.next_key(&[SECTION_COMMUNITY, server, KEY_ROOMS], &room);
        }
        false
    }
}

/// Node for a stored session-id-style key, provided the key itself is
/// plausible: 33 bytes with the network prefix, holding a dict.
fn session_like_node<'t, T: ConfigTree>(
    tree: &'t T,
    section: &[u8],
    key: &[u8],
) -> Option<&'t Node> {
    if key.len() != 33 || key[0] != SESSION_ID_PREFIX {
        return None;
    }
    match tree.node(&[section, key]) {
        Some(node @ Node::Dict(_)) => Some(node),
        _ => None,
    }
}

/// Stored keys are re-canonicalized on the way out, so even an entry written
/// by a sloppier producer yields a proper [`Community`] or is skipped.
fn assemble_community(server: &[u8], room: &[u8], pubkey: [u8; 32]) -> Option<Community> {
    let url = std::str::from_utf8(server).ok()?;
    let room = std::str::from_utf8(room).ok()?;
    Community::new(url, room, &pubkey).ok()
}

impl<T: ConfigTree> ConvoStore<T> {
    /// Cursor over every conversation, in unified order.
    pub fn cursor(&self) -> ConvoCursor {
        ConvoCursor::start(self.tree(), true, true, true)
    }

    pub fn cursor_one_to_one(&self) -> ConvoCursor {
        ConvoCursor::start(self.tree(), true, false, false)
    }

    pub fn cursor_communities(&self) -> ConvoCursor {
        ConvoCursor::start(self.tree(), false, true, false)
    }

    pub fn cursor_legacy_groups(&self) -> ConvoCursor {
        ConvoCursor::start(self.tree(), false, false, true)
    }

    /// Erase the conversation at the cursor and return the cursor advanced to
    /// the next one. A done cursor passes through unchanged.
    pub fn erase_at(&mut self, mut cur: ConvoCursor) -> ConvoCursor {
        if let Some(key) = cur.pos_one_to_one.clone() {
            self.tree_mut().remove(&[SECTION_ONE_TO_ONE, &key]);
        } else if let (Some(server), Some(room)) = (cur.pos_server.clone(), cur.pos_room.clone()) {
            self.erase_community_key(&server, &room);
        } else if let Some(key) = cur.pos_legacy.clone() {
            self.tree_mut().remove(&[SECTION_LEGACY, &key]);
        } else {
            return cur;
        }
        cur.advance(self);
        cur
    }

    /// Iterator counterpart of [`ConvoStore::cursor`].
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            store: self,
            cur: self.cursor(),
        }
    }
}

pub struct Iter<'a, T: ConfigTree> {
    store: &'a ConvoStore<T>,
    cur: ConvoCursor,
}

impl<T: ConfigTree> Iterator for Iter<'_, T> {
    type Item = Conversation;

    fn next(&mut self) -> Option<Self::Item> {
        let val = self.cur.current()?.clone();
        self.cur.advance(self.store);
        Some(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK_HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
    const NOW: i64 = 1_000_000_000_000;

    fn sid(fill: char) -> String {
        format!("05{}", String::from(fill).repeat(64))
    }

    fn populated() -> ConvoStore {
        let mut s = ConvoStore::new(&[7u8; 32], None).unwrap();
        let pk = hex::decode(PK_HEX).unwrap();

        for fill in ['5', '2'] {
            let mut c = s.get_or_construct_one_to_one(&sid(fill)).unwrap();
            c.last_read = NOW - 1;
            s.set_one_to_one_at(&c, NOW);
        }
        for (url, room) in [
            ("https://bbb.example.net", "zzz"),
            ("https://bbb.example.net", "aaa"),
            ("http://aaa.example.org:5678", "room"),
        ] {
            let mut c = s.get_or_construct_community(url, room, &pk).unwrap();
            c.last_read = NOW - 1;
            s.set_community_at(&c, NOW);
        }
        let mut g = s.get_or_construct_legacy_group(&sid('c')).unwrap();
        g.last_read = NOW - 1;
        s.set_legacy_group_at(&g, NOW);
        s
    }

    fn names(s: &ConvoStore) -> Vec<String> {
        s.iter()
            .map(|c| match c {
                Conversation::OneToOne(c) => c.session_id,
                Conversation::Community(c) => format!("{}/{}", c.base_url, c.room),
                Conversation::LegacyGroup(c) => c.id,
            })
            .collect()
    }

    #[test]
    fn unified_order() {
        let s = populated();
        assert_eq!(
            names(&s),
            vec![
                sid('2'),
                sid('5'),
                "http://aaa.example.org:5678/room".to_string(),
                "https://bbb.example.net/aaa".to_string(),
                "https://bbb.example.net/zzz".to_string(),
                sid('c'),
            ]
        );
        assert_eq!(s.iter().count(), s.size());
    }

    #[test]
    fn empty_store_cursor_is_done() {
        let s = ConvoStore::new(&[7u8; 32], None).unwrap();
        let cur = s.cursor();
        assert!(cur.done());
        assert!(cur.current().is_none());
        assert_eq!(s.iter().count(), 0);
    }

    #[test]
    fn single_kind_cursors() {
        let s = populated();
        let mut cur = s.cursor_communities();
        let mut rooms = Vec::new();
        while !cur.done() {
            let c = cur.current().unwrap().as_community().unwrap();
            rooms.push(format!("{}/{}", c.base_url, c.room));
            cur.advance(&s);
        }
        assert_eq!(
            rooms,
            vec![
                "http://aaa.example.org:5678/room",
                "https://bbb.example.net/aaa",
                "https://bbb.example.net/zzz",
            ]
        );

        assert_eq!(
            {
                let mut n = 0;
                let mut cur = s.cursor_one_to_one();
                while !cur.done() {
                    n += 1;
                    cur.advance(&s);
                }
                n
            },
            2
        );
    }

    #[test]
    fn erase_during_iteration() {
        let mut s = populated();
        // Erase every community, keep the rest.
        let mut cur = s.cursor();
        while !cur.done() {
            if cur.current().unwrap().is_community() {
                cur = s.erase_at(cur);
            } else {
                cur.advance(&s);
            }
        }
        assert_eq!(s.size_communities(), 0);
        assert_eq!(s.size_one_to_one(), 2);
        assert_eq!(s.size_legacy_groups(), 1);
        // No orphaned server entries remain.
        assert!(s.tree().node(&[SECTION_COMMUNITY]).is_none());
    }

    #[test]
    fn erase_at_returns_next_position() {
        let mut s = populated();
        let cur = s.cursor();
        let first = cur.current().unwrap().clone();
        let cur = s.erase_at(cur);
        assert_ne!(cur.current(), Some(&first));
        assert_eq!(cur, s.cursor());
    }

    #[test]
    fn malformed_entries_skipped() {
        let mut s = populated();
        let baseline = names(&s);

        // Wrong prefix, wrong length, non-dict value, and a server without a
        // pubkey: none of them should surface.
        let mut bad_prefix = [0u8; 33];
        bad_prefix[0] = 0x06;
        s.tree_mut()
            .set_int(&[SECTION_ONE_TO_ONE, &bad_prefix, b"r"], 1);
        s.tree_mut().set_int(&[SECTION_ONE_TO_ONE, b"short", b"r"], 1);
        s.tree_mut().set_bytes(&[SECTION_LEGACY, &[0x05; 33]], b"scalar");
        s.tree_mut().set_int(
            &[SECTION_COMMUNITY, b"https://nopk.example.com", KEY_ROOMS, b"room", b"r"],
            1,
        );

        assert_eq!(names(&s), baseline);
    }
}
