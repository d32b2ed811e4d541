//! Fixed-width conversation snapshots
//!
//! Interchange structs for callers outside this core (e.g. a C ABI layer):
//! raw identity bytes plus the two read-state fields, sized so they can be
//! copied without allocation. String fields are NUL-terminated within their
//! fixed buffers.

use crate::canonical::{MAX_ROOM, MAX_URL};
use crate::convo::{Community, Conversation, LegacyGroup, OneToOne};
use crate::error::ConvoError;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct OneToOneRecord {
    /// Raw 33-byte session id.
    pub session_id: [u8; 33],
    pub last_read: i64,
    pub unread: bool,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CommunityRecord {
    /// NUL-terminated canonical base URL.
    pub base_url: [u8; MAX_URL + 1],
    /// NUL-terminated canonical room token.
    pub room: [u8; MAX_ROOM + 1],
    pub pubkey: [u8; 32],
    pub last_read: i64,
    pub unread: bool,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct LegacyGroupRecord {
    /// Raw 33-byte group id.
    pub group_id: [u8; 33],
    pub last_read: i64,
    pub unread: bool,
}

fn put_cstr(dst: &mut [u8], src: &str) {
    dst[..src.len()].copy_from_slice(src.as_bytes());
    dst[src.len()] = 0;
}

fn cstr(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    // Canonical URLs and room tokens are ASCII by construction.
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

impl From<&OneToOne> for OneToOneRecord {
    fn from(c: &OneToOne) -> Self {
        Self {
            session_id: c.key(),
            last_read: c.last_read,
            unread: c.unread,
        }
    }
}

impl From<&OneToOneRecord> for OneToOne {
    /// The identity comes straight from a record this crate produced, so it
    /// is not re-validated.
    fn from(r: &OneToOneRecord) -> Self {
        let mut c = OneToOne::from_key(&r.session_id);
        c.last_read = r.last_read;
        c.unread = r.unread;
        c
    }
}

impl From<&Community> for CommunityRecord {
    fn from(c: &Community) -> Self {
        let mut base_url = [0u8; MAX_URL + 1];
        let mut room = [0u8; MAX_ROOM + 1];
        put_cstr(&mut base_url, &c.base_url);
        put_cstr(&mut room, &c.room);
        Self {
            base_url,
            room,
            pubkey: c.pubkey,
            last_read: c.last_read,
            unread: c.unread,
        }
    }
}

impl TryFrom<&CommunityRecord> for Community {
    type Error = ConvoError;

    /// URL and room round-trip through canonicalization, mirroring the
    /// validating constructor.
    fn try_from(r: &CommunityRecord) -> Result<Self, ConvoError> {
        let mut c = Community::new(cstr(&r.base_url), cstr(&r.room), &r.pubkey)?;
        c.last_read = r.last_read;
        c.unread = r.unread;
        Ok(c)
    }
}

impl From<&LegacyGroup> for LegacyGroupRecord {
    fn from(c: &LegacyGroup) -> Self {
        Self {
            group_id: c.key(),
            last_read: c.last_read,
            unread: c.unread,
        }
    }
}

impl From<&LegacyGroupRecord> for LegacyGroup {
    fn from(r: &LegacyGroupRecord) -> Self {
        let mut c = LegacyGroup::from_key(&r.group_id);
        c.last_read = r.last_read;
        c.unread = r.unread;
        c
    }
}

impl Conversation {
    /// Fixed-width snapshot of the entry, dispatched by kind.
    pub fn record(&self) -> ConversationRecord {
        match self {
            Conversation::OneToOne(c) => ConversationRecord::OneToOne(c.into()),
            Conversation::Community(c) => ConversationRecord::Community(c.into()),
            Conversation::LegacyGroup(c) => ConversationRecord::LegacyGroup(c.into()),
        }
    }
}

/// Fixed-width counterpart of [`Conversation`].
#[derive(Clone, Copy)]
pub enum ConversationRecord {
    OneToOne(OneToOneRecord),
    Community(CommunityRecord),
    LegacyGroup(LegacyGroupRecord),
}
