//! The pending-interest store.
//!
//! Incoming sync interests the engine cannot answer yet are parked
//! here until a local publish produces a positive diff against them.
//! Expiry is lazy: timed-out entries are dropped during any access,
//! never by a background task. The store is only ever touched from the
//! engine's event-loop thread, so it needs no locking.

use tokio::time::Instant;
use vectorsync_core::Name;
use vectorsync_face::Interest;

/// A parked incoming interest.
#[derive(Clone, Debug)]
pub struct PendingInterest {
    interest: Interest,
    arrival: Instant,
    expires_at: Option<Instant>,
}

impl PendingInterest {
    fn new(interest: Interest, now: Instant) -> Self {
        let expires_at = interest.lifetime.map(|lifetime| now + lifetime);
        Self {
            interest,
            arrival: now,
            expires_at,
        }
    }

    /// The parked interest.
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// The parked interest's name.
    pub fn name(&self) -> &Name {
        &self.interest.name
    }

    /// When the interest arrived.
    pub fn arrival(&self) -> Instant {
        self.arrival
    }

    /// True once the interest's lifetime has elapsed. An interest with
    /// no lifetime never expires.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Time-indexed set of unanswerable incoming interests.
#[derive(Debug, Default)]
pub struct PendingInterestStore {
    entries: Vec<PendingInterest>,
}

impl PendingInterestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an interest. Its expiry is computed from its lifetime at
    /// arrival time.
    pub fn store(&mut self, interest: Interest) {
        self.entries.push(PendingInterest::new(interest, Instant::now()));
    }

    /// Number of live entries (expired entries are dropped first).
    pub fn len(&mut self) -> usize {
        self.drop_expired(Instant::now());
        self.entries.len()
    }

    /// True if no live entries remain.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Copy out every live entry whose name starts with `prefix`,
    /// removing the matches from the store if `remove` is set.
    pub fn interests_with_prefix(&mut self, prefix: &Name, remove: bool) -> Vec<PendingInterest> {
        self.collect(|entry| prefix.is_prefix_of(entry.name()), remove)
    }

    /// Copy out every live entry whose name equals `name`, removing
    /// the matches from the store if `remove` is set.
    pub fn interests_for_name(&mut self, name: &Name, remove: bool) -> Vec<PendingInterest> {
        self.collect(|entry| entry.name() == name, remove)
    }

    fn collect(
        &mut self,
        matches: impl Fn(&PendingInterest) -> bool,
        remove: bool,
    ) -> Vec<PendingInterest> {
        self.drop_expired(Instant::now());
        let mut out = Vec::new();
        if remove {
            let mut kept = Vec::with_capacity(self.entries.len());
            for entry in self.entries.drain(..) {
                if matches(&entry) {
                    out.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            self.entries = kept;
        } else {
            out.extend(self.entries.iter().filter(|e| matches(e)).cloned());
        }
        out
    }

    fn drop_expired(&mut self, now: Instant) {
        self.entries.retain(|entry| !entry.is_expired(now));
    }
}
