//! Conversation variants and their shared read state
//!
//! A variant value is a transient, disconnected snapshot: constructing or
//! reading one never touches the store. Only [`crate::store::ConvoStore::set`]
//! persists anything.

use std::collections::BTreeMap;

use crate::canonical::{
    canonical_room, canonical_session_id, canonical_url, decode_pubkey_text, parse_full_url,
    pubkey_from_bytes,
};
use crate::error::ConvoError;
use crate::tree::Node;

/// Field key for the last-read timestamp within a conversation node.
pub(crate) const KEY_LAST_READ: &[u8] = b"r";

/// Field key for the unread flag; absent means "not unread".
pub(crate) const KEY_UNREAD: &[u8] = b"u";

/// Read-state fields of a conversation node. Missing or mistyped fields fall
/// back to defaults rather than erroring.
pub(crate) fn read_state_of(info: &BTreeMap<Vec<u8>, Node>) -> (i64, bool) {
    let last_read = info.get(KEY_LAST_READ).and_then(Node::integer).unwrap_or(0);
    let unread = info.get(KEY_UNREAD).and_then(Node::integer).unwrap_or(0) != 0;
    (last_read, unread)
}

/// A direct (1-to-1) conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OneToOne {
    /// Canonical (lowercase) 66-hex session id.
    pub session_id: String,
    /// Milliseconds since the unix epoch of the most recently read message.
    pub last_read: i64,
    /// Manually-set unread marker, independent of `last_read`.
    pub unread: bool,
}

impl OneToOne {
    pub fn new(session_id: &str) -> Result<Self, ConvoError> {
        Ok(Self {
            session_id: canonical_session_id(session_id)?,
            last_read: 0,
            unread: false,
        })
    }

    /// Build from a 33-byte key already known to be canonical (read back out
    /// of the tree). Skips validation.
    pub(crate) fn from_key(key: &[u8]) -> Self {
        Self {
            session_id: hex::encode(key),
            last_read: 0,
            unread: false,
        }
    }

    /// Raw 33-byte key form of the session id.
    pub fn key(&self) -> [u8; 33] {
        session_like_key(&self.session_id)
    }

    pub(crate) fn load(&mut self, node: &Node) {
        if let Node::Dict(info) = node {
            (self.last_read, self.unread) = read_state_of(info);
        }
    }
}

/// An open-group (community) room conversation.
///
/// Logical identity is the (base_url, room) pair; the pubkey belongs to the
/// server and is shared by every room under the same base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Community {
    /// Canonical lowercase `scheme://host[:port]`.
    pub base_url: String,
    /// Canonical lowercase room token.
    pub room: String,
    /// The server's 32-byte pubkey.
    pub pubkey: [u8; 32],
    pub last_read: i64,
    pub unread: bool,
}

impl Community {
    pub fn new(base_url: &str, room: &str, pubkey: &[u8]) -> Result<Self, ConvoError> {
        Ok(Self {
            base_url: canonical_url(base_url)?,
            room: canonical_room(room)?,
            pubkey: pubkey_from_bytes(pubkey)?,
            last_read: 0,
            unread: false,
        })
    }

    /// Like [`Community::new`] but with the pubkey given as hex, base64, or
    /// base32z text.
    pub fn with_encoded_pubkey(
        base_url: &str,
        room: &str,
        pubkey_text: &str,
    ) -> Result<Self, ConvoError> {
        Ok(Self {
            base_url: canonical_url(base_url)?,
            room: canonical_room(room)?,
            pubkey: decode_pubkey_text(pubkey_text)?,
            last_read: 0,
            unread: false,
        })
    }

    /// Build from a pasted invite link of the form
    /// `https://server[/r]/<room>?public_key=<encoded>`.
    pub fn from_full_url(full_url: &str) -> Result<Self, ConvoError> {
        let (base_url, room, pubkey) = parse_full_url(full_url)?;
        Ok(Self {
            base_url,
            room,
            pubkey,
            last_read: 0,
            unread: false,
        })
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.pubkey)
    }

    pub(crate) fn load(&mut self, node: &Node) {
        if let Node::Dict(info) = node {
            (self.last_read, self.unread) = read_state_of(info);
        }
    }
}

/// A legacy closed-group conversation. The id looks just like a session id,
/// though it isn't really one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyGroup {
    /// Canonical (lowercase) 66-hex group id.
    pub id: String,
    pub last_read: i64,
    pub unread: bool,
}

impl LegacyGroup {
    pub fn new(id: &str) -> Result<Self, ConvoError> {
        Ok(Self {
            id: canonical_session_id(id)?,
            last_read: 0,
            unread: false,
        })
    }

    pub(crate) fn from_key(key: &[u8]) -> Self {
        Self {
            id: hex::encode(key),
            last_read: 0,
            unread: false,
        }
    }

    /// Raw 33-byte key form of the group id.
    pub fn key(&self) -> [u8; 33] {
        session_like_key(&self.id)
    }

    pub(crate) fn load(&mut self, node: &Node) {
        if let Node::Dict(info) = node {
            (self.last_read, self.unread) = read_state_of(info);
        }
    }
}

// Ids are validated at construction, so the decode cannot fail here.
fn session_like_key(id: &str) -> [u8; 33] {
    let mut out = [0u8; 33];
    let _ = hex::decode_to_slice(id, &mut out);
    out
}

/// Any conversation kind, as yielded by the unified cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Conversation {
    OneToOne(OneToOne),
    Community(Community),
    LegacyGroup(LegacyGroup),
}

impl Conversation {
    pub fn last_read(&self) -> i64 {
        match self {
            Conversation::OneToOne(c) => c.last_read,
            Conversation::Community(c) => c.last_read,
            Conversation::LegacyGroup(c) => c.last_read,
        }
    }

    pub fn unread(&self) -> bool {
        match self {
            Conversation::OneToOne(c) => c.unread,
            Conversation::Community(c) => c.unread,
            Conversation::LegacyGroup(c) => c.unread,
        }
    }

    pub fn is_one_to_one(&self) -> bool {
        matches!(self, Conversation::OneToOne(_))
    }

    pub fn is_community(&self) -> bool {
        matches!(self, Conversation::Community(_))
    }

    pub fn is_legacy_group(&self) -> bool {
        matches!(self, Conversation::LegacyGroup(_))
    }

    pub fn as_one_to_one(&self) -> Option<&OneToOne> {
        match self {
            Conversation::OneToOne(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_community(&self) -> Option<&Community> {
        match self {
            Conversation::Community(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_legacy_group(&self) -> Option<&LegacyGroup> {
        match self {
            Conversation::LegacyGroup(c) => Some(c),
            _ => None,
        }
    }
}

impl From<OneToOne> for Conversation {
    fn from(c: OneToOne) -> Self {
        Conversation::OneToOne(c)
    }
}

impl From<Community> for Conversation {
    fn from(c: Community) -> Self {
        Conversation::Community(c)
    }
}

impl From<LegacyGroup> for Conversation {
    fn from(c: LegacyGroup) -> Self {
        Conversation::LegacyGroup(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION_ID: &str = "055000000000000000000000000000000000000000000000000000000000000000";
    const PK_HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn one_to_one_canonicalizes() {
        let c = OneToOne::new(&SESSION_ID.to_uppercase()).unwrap();
        assert_eq!(c.session_id, SESSION_ID);
        assert_eq!(c.key()[0], 0x05);
        assert_eq!(c.last_read, 0);
        assert!(!c.unread);

        assert!(OneToOne::new("0550").is_err());
    }

    #[test]
    fn community_equivalence_across_encodings() {
        let pk = hex::decode(PK_HEX).unwrap();
        let a = Community::new("HTTPS://Example.COM:443", "ROOM", &pk).unwrap();
        let b = Community::with_encoded_pubkey(
            "https://example.com",
            "room",
            "ASNFZ4mrze8BI0VniavN7wEjRWeJq83vASNFZ4mrze8",
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.base_url, "https://example.com");
        assert_eq!(a.room, "room");
        assert_eq!(a.pubkey_hex(), PK_HEX);
    }

    #[test]
    fn community_from_invite_link() {
        let c = Community::from_full_url(&format!(
            "http://Example.ORG:5678/r/SudokuRoom?public_key={PK_HEX}"
        ))
        .unwrap();
        assert_eq!(c.base_url, "http://example.org:5678");
        assert_eq!(c.room, "sudokuroom");
        assert_eq!(c.pubkey_hex(), PK_HEX);
    }

    #[test]
    fn load_tolerates_junk_fields() {
        let mut info = BTreeMap::new();
        info.insert(KEY_LAST_READ.to_vec(), Node::Bytes(b"not an int".to_vec()));
        let mut c = OneToOne::new(SESSION_ID).unwrap();
        c.load(&Node::Dict(info.clone()));
        assert_eq!(c.last_read, 0);
        assert!(!c.unread);

        info.insert(KEY_LAST_READ.to_vec(), Node::Int(12345));
        info.insert(KEY_UNREAD.to_vec(), Node::Int(1));
        c.load(&Node::Dict(info));
        assert_eq!(c.last_read, 12345);
        assert!(c.unread);
    }
}
