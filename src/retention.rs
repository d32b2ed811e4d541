//! Read-state retention policy
//!
//! Two cutoffs govern how long read-state is worth keeping: a short window
//! below which forward updates are no longer worth writing, and a long window
//! past which already-read conversations are dropped entirely at publish
//! time. Both are explicit configuration so tests can drive the policy with
//! synthetic clocks.

use chrono::Duration;

#[derive(Clone, Debug)]
pub struct RetentionPolicy {
    prune_low: Duration,
    prune_high: Duration,
}

impl Default for RetentionPolicy {
    /// 30-day write cutoff, 45-day publish cutoff.
    fn default() -> Self {
        Self::new(Duration::days(30), Duration::days(45))
    }
}

impl RetentionPolicy {
    pub fn new(prune_low: Duration, prune_high: Duration) -> Self {
        debug_assert!(prune_high > prune_low);
        Self {
            prune_low,
            prune_high,
        }
    }

    /// Whether an incoming `last_read` should be written over what is stored.
    ///
    /// Moving the value *backwards* is always honored: that is an intentional
    /// reset (e.g. after deleting messages locally). Moving it forwards is
    /// only worth storing while the timestamp is newer than `now - prune_low`.
    pub fn keep_on_write(&self, stored: Option<i64>, incoming: i64, now_ms: i64) -> bool {
        if stored.unwrap_or(0) > incoming {
            return true;
        }
        incoming > now_ms - self.prune_low.num_milliseconds()
    }

    /// Whether an entry should be erased during a publish pass. Unread
    /// entries are kept regardless of age.
    pub fn prune_on_publish(&self, last_read: i64, unread: bool, now_ms: i64) -> bool {
        !unread && last_read < now_ms - self.prune_high.num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetentionPolicy {
        RetentionPolicy::new(Duration::milliseconds(1000), Duration::milliseconds(5000))
    }

    #[test]
    fn backwards_writes_always_kept() {
        let p = policy();
        // A reset far older than the cutoff still goes through.
        assert!(p.keep_on_write(Some(1_000_000), 500, 1_000_000));
    }

    #[test]
    fn stale_forward_writes_dropped() {
        let p = policy();
        let now = 1_000_000;
        // Newer than stored but older than now - prune_low.
        assert!(!p.keep_on_write(Some(990_000), 995_000, now));
        // Fresh enough.
        assert!(p.keep_on_write(Some(990_000), 999_500, now));
        // No stored value: only the cutoff applies.
        assert!(p.keep_on_write(None, 999_500, now));
        assert!(!p.keep_on_write(None, 100, now));
    }

    #[test]
    fn publish_pruning() {
        let p = policy();
        let now = 1_000_000;
        assert!(p.prune_on_publish(990_000, false, now));
        assert!(!p.prune_on_publish(999_000, false, now));
        // Unread entries survive indefinitely.
        assert!(!p.prune_on_publish(0, true, now));
    }
}
