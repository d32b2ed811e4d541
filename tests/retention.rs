//! Retention behavior under synthetic clocks
//!
//! Uses millisecond-scale policies and explicit `*_at` entry points so the
//! cutoffs can be crossed without waiting for days of wall-clock time.
//!
//! Run with:
//!   cargo test --test retention

use chrono::Duration;
use convostate::{ConvoStore, MemoryTree, RetentionPolicy};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const PK_HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
const NOW: i64 = 1_000_000_000_000;

fn store() -> ConvoStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let policy = RetentionPolicy::new(Duration::milliseconds(1_000), Duration::milliseconds(5_000));
    ConvoStore::with_backing(MemoryTree::new(), policy, &[9u8; 32]).unwrap()
}

fn sid(fill: char) -> String {
    format!("05{}", String::from(fill).repeat(64))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn stale_forward_updates_are_dropped() {
    let mut s = store();

    let mut c = s.get_or_construct_one_to_one(&sid('0')).unwrap();
    c.last_read = NOW - 500;
    s.set_one_to_one_at(&c, NOW);

    // Newer than stored, but past the write cutoff: ignored.
    c.last_read = NOW + 2_000;
    s.set_one_to_one_at(&c, NOW + 4_000);
    assert_eq!(
        s.get_one_to_one(&sid('0')).unwrap().unwrap().last_read,
        NOW - 500
    );

    // A backwards move is a deliberate reset and always lands.
    c.last_read = NOW - 800;
    s.set_one_to_one_at(&c, NOW + 4_000);
    assert_eq!(
        s.get_one_to_one(&sid('0')).unwrap().unwrap().last_read,
        NOW - 800
    );
}

#[test]
fn stale_fresh_entry_is_never_created() {
    let mut s = store();
    let mut c = s.get_or_construct_one_to_one(&sid('0')).unwrap();
    c.last_read = NOW - 2_000;
    s.set_one_to_one_at(&c, NOW);
    assert!(s.empty());

    // With the unread flag set, the entry exists even though the timestamp
    // was dropped.
    c.unread = true;
    s.set_one_to_one_at(&c, NOW);
    let stored = s.get_one_to_one(&sid('0')).unwrap().unwrap();
    assert_eq!(stored.last_read, 0);
    assert!(stored.unread);
}

#[test]
fn publish_prunes_long_read_conversations() {
    let mut s = store();
    let pk = hex::decode(PK_HEX).unwrap();

    // Old and read: due for pruning.
    let mut old = s.get_or_construct_one_to_one(&sid('0')).unwrap();
    old.last_read = NOW - 10_000;
    s.set_one_to_one_at(&old, NOW - 9_900);

    // Just as old, but marked unread: survives.
    let mut unread = s.get_or_construct_legacy_group(&sid('c')).unwrap();
    unread.last_read = NOW - 10_000;
    unread.unread = true;
    s.set_legacy_group_at(&unread, NOW - 9_900);

    // Fresh: survives.
    let mut fresh = s.get_or_construct_one_to_one(&sid('1')).unwrap();
    fresh.last_read = NOW - 100;
    s.set_one_to_one_at(&fresh, NOW);

    assert_eq!(s.size(), 3);
    let (_, seq) = s.push_at(NOW);
    assert_eq!(seq, 1);
    assert_eq!(s.size(), 2);
    assert_eq!(s.get_one_to_one(&sid('0')).unwrap(), None);
    assert!(s.get_legacy_group(&sid('c')).unwrap().unwrap().unread);
    assert!(s.get_one_to_one(&sid('1')).unwrap().is_some());

    // Pruning the last room of a server takes the server entry with it.
    let mut og = s
        .get_or_construct_community("https://example.com", "lobby", &pk)
        .unwrap();
    og.last_read = NOW - 100;
    s.set_community_at(&og, NOW);
    s.push_at(NOW);
    assert_eq!(s.size_communities(), 1);
    s.push_at(NOW + 10_000);
    assert_eq!(s.size_communities(), 0);
    assert_eq!(s.get_community("https://example.com", "lobby").unwrap(), None);
}

#[test]
fn quiet_publish_keeps_sequence() {
    let mut s = store();
    let mut c = s.get_or_construct_one_to_one(&sid('0')).unwrap();
    c.last_read = NOW - 100;
    s.set_one_to_one_at(&c, NOW);

    assert_eq!(s.push_at(NOW).1, 1);
    // Nothing changed and nothing pruned: the sequence holds.
    assert_eq!(s.push_at(NOW + 1_000).1, 1);
    // A later publish crosses the prune cutoff and commits the removal.
    assert_eq!(s.push_at(NOW + 10_000).1, 2);
    assert!(s.empty());
}
