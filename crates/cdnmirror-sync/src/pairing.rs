//! Rename pairing
//!
//! The kernel reports a rename as a moved-from and a moved-to event sharing
//! a cookie. Either half may arrive alone: a file moved out of the watched
//! tree has no moved-to, one moved in has no moved-from. Halves wait here
//! for their partner until the grace period runs out and are then released
//! as orphans.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{trace, warn};

use crate::events::Event;

/// An event after pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEvent {
    /// Anything that is not half of a rename
    Single(Event),
    /// Both halves arrived
    Moved { from: Event, to: Event },
    /// Moved-from whose partner never came
    OrphanFrom(Event),
    /// Moved-to whose partner never came
    OrphanTo(Event),
}

#[derive(Debug)]
struct PendingHalf {
    event: Event,
    deadline: Instant,
}

/// Holds unmatched rename halves by cookie
#[derive(Debug)]
pub struct CookiePairing {
    grace: Duration,
    pending: HashMap<u32, PendingHalf>,
}

impl CookiePairing {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            pending: HashMap::new(),
        }
    }

    /// Feeds one event
    ///
    /// Returns the resolved event when it can be decided now, `None` when the
    /// event is waiting for its partner.
    pub fn push(&mut self, event: Event, now: Instant) -> Option<ResolvedEvent> {
        let is_half = event.mask.is_moved_from() || event.mask.is_moved_to();
        if !is_half || event.cookie == 0 {
            return Some(ResolvedEvent::Single(event));
        }

        if let Some(waiting) = self.pending.get(&event.cookie) {
            if waiting.event.mask.is_moved_from() == event.mask.is_moved_from() {
                warn!(
                    cookie = event.cookie,
                    mask = ?event.mask,
                    name = ?event.name,
                    "Second rename half of the same kind; discarded"
                );
                return None;
            }

            let waiting = self.pending.remove(&event.cookie)?;
            let (from, to) = if waiting.event.mask.is_moved_from() {
                (waiting.event, event)
            } else {
                (event, waiting.event)
            };
            trace!(cookie = from.cookie, "Rename paired");
            return Some(ResolvedEvent::Moved { from, to });
        }

        self.hold(event, now);
        None
    }

    /// Releases every half whose grace period ended at or before `now`,
    /// oldest first
    pub fn expire(&mut self, now: Instant) -> Vec<ResolvedEvent> {
        let mut expired: Vec<(u32, Instant)> = self
            .pending
            .iter()
            .filter(|(_, half)| half.deadline <= now)
            .map(|(cookie, half)| (*cookie, half.deadline))
            .collect();
        expired.sort_by_key(|(_, deadline)| *deadline);

        expired
            .into_iter()
            .filter_map(|(cookie, _)| self.pending.remove(&cookie))
            .map(|half| {
                trace!(cookie = half.event.cookie, "Rename half orphaned");
                orphan(half.event)
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn hold(&mut self, event: Event, now: Instant) {
        self.pending.insert(
            event.cookie,
            PendingHalf {
                event,
                deadline: now + self.grace,
            },
        );
    }
}

fn orphan(event: Event) -> ResolvedEvent {
    if event.mask.is_moved_from() {
        ResolvedEvent::OrphanFrom(event)
    } else {
        ResolvedEvent::OrphanTo(event)
    }
}
