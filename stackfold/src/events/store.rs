//! Per-origin trace event store
//!
//! Ingestion records into the live map of the event's origin; the flush
//! path atomically replaces that map with an empty one and owns the old map
//! exclusively afterwards. Every recorded event ends up in exactly one
//! snapshot: either the one being swapped out or the next one.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::mem;

use super::trace::{TraceEvents, TraceKey};
use crate::domain::{Origin, Pid};

/// Aggregated events of one origin for one interval
pub type KeyToEvents<M> = HashMap<TraceKey<M>, TraceEvents>;

/// Snapshot of every origin, as taken by one flush
pub type OriginEvents<M> = BTreeMap<Origin, KeyToEvents<M>>;

pub struct TraceEventStore<M> {
    maps: [RwLock<KeyToEvents<M>>; 2],
}

impl<M: Hash + Eq> Default for TraceEventStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Hash + Eq> TraceEventStore<M> {
    #[must_use]
    pub fn new() -> Self {
        Self { maps: [RwLock::new(HashMap::new()), RwLock::new(HashMap::new())] }
    }

    /// Merge one payload into the live map of `origin`
    pub fn record(&self, origin: Origin, key: TraceKey<M>, events: TraceEvents) {
        let mut map = self.maps[origin.index()].write();
        match map.get_mut(&key) {
            Some(existing) => existing.merge(events),
            None => {
                map.insert(key, events);
            }
        }
    }

    /// Take the live map of `origin`, leaving an empty one in its place
    pub fn swap(&self, origin: Origin) -> KeyToEvents<M> {
        mem::take(&mut *self.maps[origin.index()].write())
    }

    /// Take the live maps of every origin
    ///
    /// Both write locks are held across the swap.
    pub fn swap_all(&self) -> OriginEvents<M> {
        let mut sampling = self.maps[Origin::Sampling.index()].write();
        let mut off_cpu = self.maps[Origin::OffCpu.index()].write();
        let mut snapshot = BTreeMap::new();
        snapshot.insert(Origin::Sampling, mem::take(&mut *sampling));
        snapshot.insert(Origin::OffCpu, mem::take(&mut *off_cpu));
        snapshot
    }

    /// Number of distinct keys currently aggregated for `origin`
    #[must_use]
    pub fn len(&self, origin: Origin) -> usize {
        self.maps[origin.index()].read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        Origin::ALL.iter().all(|origin| self.len(*origin) == 0)
    }
}

/// Split a snapshot by process, preserving the origin partition
#[must_use]
pub fn group_by_process<M: Hash + Eq>(snapshot: OriginEvents<M>) -> BTreeMap<Pid, OriginEvents<M>> {
    let mut grouped: BTreeMap<Pid, OriginEvents<M>> = BTreeMap::new();
    for (origin, events) in snapshot {
        for (key, payload) in events {
            grouped.entry(key.pid).or_default().entry(origin).or_default().insert(key, payload);
        }
    }
    grouped
}
