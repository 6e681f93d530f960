//! Throttling of outgoing events
//!
//! The scheduler only decides *when* to send. It never holds payloads: a
//! deferred send is built from the session state at the moment it fires, so
//! coalesced calls always carry the latest value.

use std::collections::BTreeMap;
use std::time::Duration;

use tandem_core::path::{is_same_or_descendant, is_strict_descendant};
use tokio::time::Instant;

/// What a throttled send is for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThrottleKey {
    UpdateKey(String),
    UpdateText(String),
    Awareness,
}

impl ThrottleKey {
    fn path(&self) -> Option<&str> {
        match self {
            ThrottleKey::UpdateKey(path) | ThrottleKey::UpdateText(path) => Some(path),
            ThrottleKey::Awareness => None,
        }
    }
}

/// Edge behavior of a throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Fire on the first call, then once more at the end of the window
    LeadingAndTrailing,
    /// Fire once at the end of the window
    Trailing,
}

/// Result of registering a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Send now
    Fire,
    /// Send when `delay` elapsed, if the ticket is still due then
    Defer { ticket: u64, delay: Duration },
    /// A deferred send is already scheduled and will carry this call
    Coalesced,
}

#[derive(Debug)]
struct Slot {
    edge: Edge,
    window_end: Instant,
    pending: Option<u64>,
}

/// Per-key throttle windows
#[derive(Debug)]
pub struct Scheduler {
    window: Duration,
    slots: BTreeMap<ThrottleKey, Slot>,
    next_ticket: u64,
}

impl Scheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: BTreeMap::new(),
            next_ticket: 1,
        }
    }

    /// Register a call for `key`
    pub fn call(&mut self, key: ThrottleKey, edge: Edge, now: Instant) -> Decision {
        let ticket = self.next_ticket;

        match self.slots.get_mut(&key) {
            Some(slot) if slot.pending.is_some() => Decision::Coalesced,
            Some(slot) if now < slot.window_end => {
                slot.pending = Some(ticket);
                self.next_ticket += 1;
                Decision::Defer {
                    ticket,
                    delay: slot.window_end - now,
                }
            }
            _ => {
                let window_end = now + self.window;
                match edge {
                    Edge::LeadingAndTrailing => {
                        self.slots.insert(
                            key,
                            Slot {
                                edge,
                                window_end,
                                pending: None,
                            },
                        );
                        Decision::Fire
                    }
                    Edge::Trailing => {
                        self.slots.insert(
                            key,
                            Slot {
                                edge,
                                window_end,
                                pending: Some(ticket),
                            },
                        );
                        self.next_ticket += 1;
                        Decision::Defer {
                            ticket,
                            delay: self.window,
                        }
                    }
                }
            }
        }
    }

    /// Claim a deferred send. Returns false if it was cancelled, flushed or
    /// replaced in the meantime.
    pub fn take_due(&mut self, key: &ThrottleKey, ticket: u64, now: Instant) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        if slot.pending != Some(ticket) {
            return false;
        }
        match slot.edge {
            Edge::LeadingAndTrailing => {
                // The trailing send opens a new window
                slot.pending = None;
                slot.window_end = now + self.window;
            }
            Edge::Trailing => {
                self.slots.remove(key);
            }
        }
        true
    }

    pub fn is_pending(&self, key: &ThrottleKey) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.pending.is_some())
    }

    /// Abort the throttle of `key`, dropping any deferred send
    pub fn cancel(&mut self, key: &ThrottleKey) -> bool {
        self.slots
            .remove(key)
            .is_some_and(|slot| slot.pending.is_some())
    }

    /// Abort throttles of paths strictly below `path`
    pub fn cancel_descendants(&mut self, path: &str) -> Vec<ThrottleKey> {
        self.cancel_where(|p| is_strict_descendant(p, path))
    }

    /// Abort throttles of `path` and every path below it
    pub fn cancel_subtree(&mut self, path: &str) -> Vec<ThrottleKey> {
        self.cancel_where(|p| is_same_or_descendant(p, path))
    }

    fn cancel_where(&mut self, matches: impl Fn(&str) -> bool) -> Vec<ThrottleKey> {
        let mut cancelled = Vec::new();
        self.slots.retain(|key, slot| match key.path() {
            Some(p) if matches(p) => {
                if slot.pending.is_some() {
                    cancelled.push(key.clone());
                }
                false
            }
            _ => true,
        });
        cancelled
    }

    /// Remove every throttle and return the keys that had a deferred send,
    /// in key order
    pub fn drain_pending(&mut self) -> Vec<ThrottleKey> {
        std::mem::take(&mut self.slots)
            .into_iter()
            .filter(|(_, slot)| slot.pending.is_some())
            .map(|(key, _)| key)
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn key(path: &str) -> ThrottleKey {
        ThrottleKey::UpdateKey(path.into())
    }

    fn text(path: &str) -> ThrottleKey {
        ThrottleKey::UpdateText(path.into())
    }

    #[test]
    fn test_leading_and_trailing() {
        let mut scheduler = Scheduler::new(WINDOW);
        let t0 = Instant::now();

        assert_eq!(scheduler.call(key("a"), Edge::LeadingAndTrailing, t0), Decision::Fire);
        let Decision::Defer { ticket, delay } =
            scheduler.call(key("a"), Edge::LeadingAndTrailing, t0 + Duration::from_millis(100))
        else {
            panic!("expected a deferred send");
        };
        assert_eq!(delay, Duration::from_millis(900));
        assert_eq!(
            scheduler.call(key("a"), Edge::LeadingAndTrailing, t0 + Duration::from_millis(200)),
            Decision::Coalesced
        );

        assert!(scheduler.take_due(&key("a"), ticket, t0 + WINDOW));
        assert!(!scheduler.take_due(&key("a"), ticket, t0 + WINDOW));

        // Still inside the window opened by the trailing send
        assert!(matches!(
            scheduler.call(key("a"), Edge::LeadingAndTrailing, t0 + WINDOW + Duration::from_millis(10)),
            Decision::Defer { .. }
        ));
    }

    #[test]
    fn test_leading_fires_again_after_quiet_window() {
        let mut scheduler = Scheduler::new(WINDOW);
        let t0 = Instant::now();
        assert_eq!(scheduler.call(key("a"), Edge::LeadingAndTrailing, t0), Decision::Fire);
        assert_eq!(
            scheduler.call(key("a"), Edge::LeadingAndTrailing, t0 + WINDOW * 2),
            Decision::Fire
        );
    }

    #[test]
    fn test_trailing_only() {
        let mut scheduler = Scheduler::new(WINDOW);
        let t0 = Instant::now();

        let Decision::Defer { ticket, delay } = scheduler.call(text("t"), Edge::Trailing, t0) else {
            panic!("expected a deferred send");
        };
        assert_eq!(delay, WINDOW);
        assert_eq!(scheduler.call(text("t"), Edge::Trailing, t0), Decision::Coalesced);
        assert!(scheduler.is_pending(&text("t")));

        assert!(scheduler.take_due(&text("t"), ticket, t0 + WINDOW));
        assert!(!scheduler.is_pending(&text("t")));
        assert!(matches!(
            scheduler.call(text("t"), Edge::Trailing, t0 + WINDOW),
            Decision::Defer { delay, .. } if delay == WINDOW
        ));
    }

    #[test]
    fn test_cancelled_ticket_is_not_due() {
        let mut scheduler = Scheduler::new(WINDOW);
        let t0 = Instant::now();
        let Decision::Defer { ticket, .. } = scheduler.call(ThrottleKey::Awareness, Edge::Trailing, t0) else {
            panic!("expected a deferred send");
        };
        assert!(scheduler.cancel(&ThrottleKey::Awareness));
        assert!(!scheduler.take_due(&ThrottleKey::Awareness, ticket, t0 + WINDOW));
    }

    #[test]
    fn test_cancel_descendants() {
        let mut scheduler = Scheduler::new(WINDOW);
        let t0 = Instant::now();
        for path in ["a.b", "a.[0]", "ab", "a"] {
            scheduler.call(text(path), Edge::Trailing, t0);
        }
        scheduler.call(ThrottleKey::Awareness, Edge::Trailing, t0);

        let cancelled = scheduler.cancel_descendants("a");
        assert_eq!(cancelled, vec![text("a.[0]"), text("a.b")]);
        assert!(scheduler.is_pending(&text("a")));
        assert!(scheduler.is_pending(&text("ab")));
        assert!(scheduler.is_pending(&ThrottleKey::Awareness));

        let cancelled = scheduler.cancel_subtree("a");
        assert_eq!(cancelled, vec![text("a")]);
    }

    #[test]
    fn test_drain_pending_in_key_order() {
        let mut scheduler = Scheduler::new(WINDOW);
        let t0 = Instant::now();
        scheduler.call(ThrottleKey::Awareness, Edge::Trailing, t0);
        scheduler.call(text("b"), Edge::Trailing, t0);
        // Leading send only, nothing deferred
        scheduler.call(key("c"), Edge::LeadingAndTrailing, t0);
        scheduler.call(key("a"), Edge::LeadingAndTrailing, t0);
        scheduler.call(key("a"), Edge::LeadingAndTrailing, t0);

        assert_eq!(
            scheduler.drain_pending(),
            vec![key("a"), text("b"), ThrottleKey::Awareness]
        );
        assert!(!scheduler.is_pending(&text("b")));
    }
}
