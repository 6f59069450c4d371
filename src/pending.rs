//! Pending-request table: requests the engine chose not to answer immediately, parked with
//! a snapshot of the sketch they were evaluated against and an expiry timer.
//!
//! The table is the sole owner of each entry. The expiry task closes only over the request's
//! [`Name`] and a weak-ish callback into the engine (an `Arc` the engine controls), looking
//! the entry up by name to remove it — there is no cycle between the map and the timer.

use std::collections::HashMap;

use crate::name::Name;
use crate::scheduler::TimerHandle;

/// Upper bound on concurrently parked requests, guarding against an unbounded table if a
/// misbehaving peer floods distinct request names. Chosen generously relative to any
/// realistic expectedEntries configuration for this protocol.
pub const MAX_PENDING: usize = 10_000;

pub struct PendingEntry<S> {
    pub snapshot: S,
    pub expiry: TimerHandle,
}

pub struct PendingTable<S> {
    entries: HashMap<Name, PendingEntry<S>>,
}

impl<S> Default for PendingTable<S> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<S> PendingTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the entry for `name` without disturbing it or its expiry timer — used to
    /// re-evaluate a parked request against a fresh local state without losing the original
    /// expiry if the difference still isn't worth answering.
    pub fn get(&self, name: &Name) -> Option<&PendingEntry<S>> {
        self.entries.get(name)
    }

    /// Inserts (or replaces) the entry for `name`, cancelling any prior expiry timer for the
    /// same name first. Returns `false` without inserting if the table is at capacity and
    /// `name` was not already present.
    pub fn insert(&mut self, name: Name, entry: PendingEntry<S>) -> bool {
        if let Some(prior) = self.entries.remove(&name) {
            prior.expiry.cancel();
        } else if self.entries.len() >= MAX_PENDING {
            return false;
        }
        self.entries.insert(name, entry);
        true
    }

    /// Removes and returns the entry for `name`, cancelling its expiry.
    pub fn remove(&mut self, name: &Name) -> Option<PendingEntry<S>> {
        let entry = self.entries.remove(name)?;
        entry.expiry.cancel();
        Some(entry)
    }

    /// Removes an entry without cancelling its timer — used from inside the expiry task
    /// itself, where the timer has already fired.
    pub fn remove_on_expiry(&mut self, name: &Name) -> Option<PendingEntry<S>> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &PendingEntry<S>)> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<Name> {
        self.entries.keys().cloned().collect()
    }
}
