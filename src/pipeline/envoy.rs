//! The Envoy: per-partition state that guarantees at most one batch per
//! entity is ever in flight downstream, while letting unrelated entities
//! progress independently (spec §4.7).
//!
//! `World::send` enqueues one event at a time, so every group this Envoy
//! ever emits is a singleton — the waiting-queue/busy-tracking machinery
//! below is written generally (a `VecDeque<Event>` per entity, not just a
//! busy flag) so a future batched `notify` could release several queued
//! events together without changing the per-entity sequencing guarantee.

use std::collections::VecDeque;

use crossbeam::channel::Sender;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::entity::Hash160;
use crate::event::Event;

pub struct Envoy {
    lanes: DashMap<Hash160, VecDeque<Event>>,
    downstream: Sender<Event>,
}

impl Envoy {
    pub fn new(downstream: Sender<Event>) -> Self {
        Envoy {
            lanes: DashMap::new(),
            downstream,
        }
    }

    /// Emits `event` immediately if its entity isn't already tracked
    /// (marking it busy with an empty waiting queue); otherwise appends it
    /// to that entity's waiting queue.
    pub fn enqueue(&self, event: Event) {
        let hash = event.entity.hash();
        let emit = match self.lanes.entry(hash) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().push_back(event);
                None
            }
            Entry::Vacant(vacant) => {
                vacant.insert(VecDeque::new());
                Some(event)
            }
        };
        if let Some(event) = emit {
            log::debug!("envoy: dispatching {:?} immediately", hash);
            let _ = self.downstream.send(event);
        }
    }

    /// Called by a Scribe worker once it finishes an entity's batch. Pops
    /// the next waiting event, if any; otherwise stops tracking the
    /// entity entirely.
    pub fn ack(&self, hash: Hash160) {
        let popped = match self.lanes.get_mut(&hash) {
            Some(mut lane) => lane.pop_front(),
            None => return,
        };
        match popped {
            Some(event) => {
                log::debug!("envoy: releasing queued event for {:?}", hash);
                let _ = self.downstream.send(event);
            }
            None => {
                self.lanes.remove(&hash);
            }
        }
    }

    /// Whether any entity currently has a batch queued or in flight.
    /// Polled by `World::flush` as a (coarse) drain signal.
    pub fn is_idle(&self) -> bool {
        self.lanes.is_empty()
    }
}
