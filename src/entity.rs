//! Entity identifiers.
//!
//! An [`Entity`] is an opaque, context-scoped handle. Two entities are equal
//! iff their [`Hash160`] digests are equal; the digest is derived from the
//! allocating node, world, context, and a process-unique token, so it is
//! cheap to compare and collision-resistant enough to use as the storage
//! core's primary key.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use sha1::{Digest, Sha1};

/// A 160-bit SHA-1 digest used as an entity's primary key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash160([u8; 20]);

impl Hash160 {
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Process-unique handle to a [`crate::context::Context`]. Contexts hand
/// these out; entities carry one rather than a borrowed reference so an
/// `Entity` value stays `'static` and cheaply cloneable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub(crate) u64);

/// Process-unique handle to a [`crate::world::World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldHandle(pub(crate) u64);

/// A monotonically increasing, process-unique token minted for every
/// allocated entity. Combined with the node id, it is the "fresh opaque
/// ref" the spec's hash formula closes over.
fn next_ref() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Process-wide node identifier. A single process is "one node"; this exists
/// so the hash formula's `(node, context, world, ref)` tuple has a concrete
/// first element without requiring a distributed-systems identity scheme
/// (clustering across machines is an explicit non-goal).
fn node_id() -> u64 {
    static NODE: AtomicU64 = AtomicU64::new(0);
    let mut current = NODE.load(Ordering::Relaxed);
    if current == 0 {
        // Seed once from a pointer address, which is unique enough to
        // distinguish processes within a single test run or machine.
        let seed = &NODE as *const _ as u64;
        current = seed | 1;
        NODE.store(current, Ordering::Relaxed);
    }
    current
}

fn hash160(context: ContextHandle, world: Option<WorldHandle>, reference: u64) -> Hash160 {
    let mut hasher = Sha1::new();
    hasher.update(node_id().to_le_bytes());
    hasher.update(context.0.to_le_bytes());
    hasher.update(world.map(|w| w.0).unwrap_or(0).to_le_bytes());
    hasher.update(reference.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest);
    Hash160(bytes)
}

/// An opaque, context-scoped entity identifier.
///
/// Entities are created by a [`crate::context::Context`] and never outlive
/// it. Cloning an entity (see [`crate::context::Context::clone_of`]) produces
/// a new entity whose `parent` points back to the original.
#[derive(Clone)]
pub struct Entity {
    ops_ref: u64,
    hash: Hash160,
    name: Option<String>,
    parent: Option<Box<Entity>>,
    context: ContextHandle,
    world: Option<WorldHandle>,
}

impl Entity {
    /// Construct a new entity bound to `context`. `name`/`parent`/`world`
    /// are the optional fields from the spec's construction contract.
    pub fn new(
        context: ContextHandle,
        name: Option<String>,
        parent: Option<Entity>,
        world: Option<WorldHandle>,
    ) -> Self {
        let ops_ref = next_ref();
        let hash = hash160(context, world, ops_ref);
        Entity {
            ops_ref,
            hash,
            name,
            parent: parent.map(Box::new),
            context,
            world,
        }
    }

    #[inline]
    pub fn hash(&self) -> Hash160 {
        self.hash
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn parent(&self) -> Option<&Entity> {
        self.parent.as_deref()
    }

    #[inline]
    pub fn context(&self) -> ContextHandle {
        self.context
    }

    #[inline]
    pub fn world(&self) -> Option<WorldHandle> {
        self.world
    }

    /// Two entities are equal iff their hashes are equal.
    #[inline]
    pub fn equal(&self, other: &Entity) -> bool {
        self.hash == other.hash
    }

    /// Whether `self` and `other` were created by the same context.
    #[inline]
    pub fn colocated(&self, other: &Entity) -> bool {
        self.context == other.context
    }

    #[inline]
    pub fn named(&self) -> bool {
        self.name.is_some()
    }

    #[inline]
    pub fn child(&self) -> bool {
        self.parent.is_some()
    }

    /// Produce a child entity sharing this entity's context/world, with
    /// `parent` set to a clone of `self`. The returned entity has a fresh
    /// hash; it is not inserted into any table until the caller does so.
    pub(crate) fn spawn_child(&self, name: Option<String>) -> Entity {
        Entity::new(self.context, name, Some(self.clone()), self.world)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}
impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("hash", &self.hash)
            .field("name", &self.name)
            .field("ops_ref", &self.ops_ref)
            .finish()
    }
}

/// Allocates fresh [`ContextHandle`]s and [`WorldHandle`]s. One global
/// counter is enough: handles only need to be unique within the process.
pub(crate) fn fresh_context_handle() -> ContextHandle {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    ContextHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub(crate) fn fresh_world_handle() -> WorldHandle {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    WorldHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_from_same_context_have_distinct_hashes() {
        // Given
        let ctx = fresh_context_handle();

        // When
        let e1 = Entity::new(ctx, None, None, None);
        let e2 = Entity::new(ctx, None, None, None);

        // Then
        assert!(!e1.equal(&e2));
        assert!(e1.colocated(&e2));
    }

    #[test]
    fn equality_is_hash_based() {
        // Given
        let ctx = fresh_context_handle();
        let e1 = Entity::new(ctx, Some("hero".into()), None, None);
        let e2 = e1.clone();

        // Then
        assert_eq!(e1, e2);
        assert!(e1.named());
    }

    #[test]
    fn spawn_child_links_parent() {
        // Given
        let ctx = fresh_context_handle();
        let parent = Entity::new(ctx, Some("parent".into()), None, None);

        // When
        let child = parent.spawn_child(None);

        // Then
        assert!(child.child());
        assert!(child.parent().unwrap().equal(&parent));
        assert!(!child.equal(&parent));
    }

    #[test]
    fn different_contexts_are_not_colocated() {
        // Given
        let ctx_a = fresh_context_handle();
        let ctx_b = fresh_context_handle();

        // When
        let e1 = Entity::new(ctx_a, None, None, None);
        let e2 = Entity::new(ctx_b, None, None, None);

        // Then
        assert!(!e1.colocated(&e2));
    }
}
