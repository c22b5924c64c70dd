//! The Herald: the pipeline's producer-side entry point. Stateless beyond
//! the partition count — its only job is mapping an entity hash to a
//! partition index the same way on every call (spec §4.7: "the stable hash
//! must be deterministic across runs given the same entity hash").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::entity::Hash160;

pub struct Herald {
    partitions: usize,
}

impl Herald {
    pub fn new(partitions: usize) -> Self {
        assert!(partitions > 0, "a World needs at least one partition");
        Herald { partitions }
    }

    /// `event.entity.hash() -> partition index`, stable for a given hash
    /// across calls within one process.
    pub fn route(&self, hash: Hash160) -> usize {
        let mut hasher = DefaultHasher::new();
        hash.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{fresh_context_handle, Entity};

    #[test]
    fn routing_is_deterministic_and_in_range() {
        // Given
        let herald = Herald::new(4);
        let ctx = fresh_context_handle();
        let entity = Entity::new(ctx, None, None, None);

        // When
        let first = herald.route(entity.hash());
        let second = herald.route(entity.hash());

        // Then
        assert_eq!(first, second);
        assert!(first < 4);
    }
}
