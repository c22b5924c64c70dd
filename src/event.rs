//! Events: immutable-except-for-`args` records dispatched to entities, with
//! drift detection across handler invocations.

use std::any::TypeId;
use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};

use crate::component::PropMap;
use crate::entity::{Entity, WorldHandle};
use crate::error::Fault;

/// Monotonic-ish timestamp, in nanoseconds since the unix epoch. Used only
/// for ordering/observability, never as a correctness mechanism (ordering
/// guarantees come from the pipeline, not from comparing timestamps).
pub type Timestamp = u128;

pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos()
}

/// A named record dispatched to an entity. Every field except `args` is
/// fixed for the lifetime of one dispatch; handlers may only rewrite
/// `args`, and every rewrite is checked for drift on every other field
/// before the next handler runs.
#[derive(Clone, Debug)]
pub struct Event {
    pub name: String,
    pub world: WorldHandle,
    pub entity: Entity,
    pub timestamp: Timestamp,
    pub args: PropMap,
    pub handlers: Vec<TypeId>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        world: WorldHandle,
        entity: Entity,
        args: PropMap,
        handlers: Vec<TypeId>,
    ) -> Self {
        Event {
            name: name.into(),
            world,
            entity,
            timestamp: now(),
            args,
            handlers,
        }
    }

    /// A collision-resistant digest over every field except `args`. Taken
    /// before the first handler runs and recomputed after each one; any
    /// difference means a handler mutated `world`, `entity`, `timestamp`, or
    /// `handlers` and is a system bug (spec §4.6 "Event drifted during
    /// processing").
    pub fn checksum(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.world.0.to_le_bytes());
        hasher.update(self.entity.hash().as_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        for handler in &self.handlers {
            hasher.update(format!("{handler:?}").as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }

    /// Recompute the checksum against a baseline taken before a handler ran.
    /// Returns [`Fault::EventDrifted`] naming the offending handler's
    /// component alias if anything besides `args` changed.
    pub fn check_drift(&self, baseline: [u8; 20], component_alias: &'static str) -> Result<(), Fault> {
        if self.checksum() == baseline {
            Ok(())
        } else {
            Err(Fault::EventDrifted {
                component: component_alias,
            })
        }
    }
}

/// A handler's verdict: continue to the next handler in registration order,
/// or stop propagating this event (subsequent events in the same batch are
/// unaffected).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Halt,
}
