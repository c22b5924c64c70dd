//! The storage core: four coherent indexes over every `(entity, component
//! type, component value, metadata)` tuple, serving dirty reads straight off
//! shared tables and serialising every write through one writer task.
//!
//! `mtable`/`nindex` are lock-free `DashMap`s; `ctable`/`tindex` are
//! per-key vectors behind the same map. `aindex` is kept as one entry per
//! entity (`Hash160 -> Mask`) rather than literally grouped by mask value —
//! the invariant only promises one `(mask, hash)` row per live entity, and a
//! bitwise scan over "every entity's current mask" is exactly as cheap
//! either way, so there's nothing to gain from grouping by a key that isn't
//! itself hashable.
//!
//! Writes go through a single-threaded [`crate::task::Executor`] (the same
//! primitive the pipeline's Scribe pools use) so that every mutation is
//! linearised in arrival order; reads bypass it entirely and touch the
//! `DashMap`s directly, which is the "dirty by design" trade-off spec §4.3
//! and §9 call out explicitly.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::bloom::Mask;
use crate::component::{ComponentValue, PropMap};
use crate::entity::{ContextHandle, Entity, Hash160, WorldHandle};
use crate::error::{ShapeError, StoreError};
use crate::event::{now, Timestamp};
use crate::task::Executor;

/// Options accepted by [`Context::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub name: Option<String>,
    pub parent: Option<Entity>,
    pub world: Option<WorldHandle>,
    pub metadata: Option<PropMap>,
}

/// Either an [`Entity`] or a name, the two keys every lookup-style Context
/// operation accepts (spec §4.3: `exists?(entity|name)`, `fetch(entity|
/// name)`).
pub enum Key<'a> {
    Entity(&'a Entity),
    Name(&'a str),
}

impl<'a> From<&'a Entity> for Key<'a> {
    fn from(entity: &'a Entity) -> Self {
        Key::Entity(entity)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(name: &'a str) -> Self {
        Key::Name(name)
    }
}

/// `(entity, types, metadata)`, as returned by `info`/`lookup`.
#[derive(Clone, Debug)]
pub struct Info {
    pub entity: Entity,
    pub types: HashSet<TypeId>,
    pub metadata: PropMap,
    pub created_at: Timestamp,
}

#[derive(Clone)]
struct MEntry {
    entity: Entity,
    types: HashSet<TypeId>,
    metadata: PropMap,
    created_at: Timestamp,
}

/// The four (well, five — see the module doc on `aindex`/`type_terms`)
/// tables backing one [`Context`]. Kept behind an `Arc` so the writer task's
/// closures and the Context's own read methods can each hold a cheap handle
/// to the same storage.
struct Tables {
    mtable: DashMap<Hash160, MEntry>,
    ctable: DashMap<Hash160, Vec<ComponentValue>>,
    tindex: DashMap<TypeId, Vec<(Hash160, ComponentValue)>>,
    nindex: DashMap<String, Hash160>,
    aindex: DashMap<Hash160, Mask>,
    /// Cache of `TypeId -> bloom term`, learned the first time a component
    /// of that type is emplaced anywhere in this Context. Lets `all_of`/
    /// `any_of`/`none_of`/`search` compute masks without reaching back into
    /// a component registry (spec's Context is a leaf relative to Registry
    /// in the module table, §2).
    type_terms: DashMap<TypeId, Mask>,
}

impl Tables {
    fn new() -> Self {
        Tables {
            mtable: DashMap::new(),
            ctable: DashMap::new(),
            tindex: DashMap::new(),
            nindex: DashMap::new(),
            aindex: DashMap::new(),
            type_terms: DashMap::new(),
        }
    }

    fn clear(&self) {
        self.mtable.clear();
        self.ctable.clear();
        self.tindex.clear();
        self.nindex.clear();
        self.aindex.clear();
        // type_terms deliberately survives `clear()`: it's a read-only cache
        // of declared contracts, not live entity state.
    }

    fn resolve<'a>(&self, key: &Key<'a>) -> Option<Hash160> {
        match key {
            Key::Entity(e) => Some(e.hash()),
            Key::Name(n) => self.nindex.get(*n).map(|h| *h),
        }
    }

    fn recompute_mask(&self, hash: Hash160) {
        let mask = self
            .ctable
            .get(&hash)
            .map(|row| {
                let mut m = Mask::empty();
                for cv in row.iter() {
                    m.merge(&cv.bloom_term());
                }
                m
            })
            .unwrap_or_else(Mask::empty);
        self.aindex.insert(hash, mask);
    }

    fn remember_term(&self, cv: &ComponentValue) {
        self.type_terms.entry(cv.type_id).or_insert_with(|| cv.bloom_term());
    }
}

thread_local! {
    /// Which Context's writer job (if any) the *current thread* is inside.
    /// `Context::call` checks this before enqueueing: a nested call whose
    /// handle matches runs inline instead of re-submitting to the writer's
    /// single worker, which would otherwise deadlock the worker against
    /// itself. This is what lets [`Context::transact`] hand a caller-supplied
    /// closure a `&Context` it can freely call `emplace`/`assign`/... on.
    static ACTIVE_WRITER: std::cell::Cell<Option<ContextHandle>> = std::cell::Cell::new(None);
}

/// The storage core. One per [`crate::world::World`] (plus one more, owned
/// by the [`crate::registry::Registry`], for the prefab catalogue — spec
/// §4.4).
///
/// Cheaply `Clone`: every field is an `Arc` (or `Copy`) handle to the same
/// underlying tables and writer, matching how [`Entity`] carries a
/// [`ContextHandle`] rather than a borrow. Cloning a `Context` does not
/// create a second store.
#[derive(Clone)]
pub struct Context {
    handle: ContextHandle,
    name: Option<String>,
    tables: Arc<Tables>,
    writer: Arc<Executor>,
}

impl Context {
    /// Creates a fresh, empty Context bound to a new [`ContextHandle`].
    pub fn new(name: impl Into<Option<String>>) -> Self {
        Context {
            handle: crate::entity::fresh_context_handle(),
            name: name.into(),
            tables: Arc::new(Tables::new()),
            writer: Arc::new(Executor::single_threaded()),
        }
    }

    #[inline]
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn call<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if ACTIVE_WRITER.with(|cell| cell.get()) == Some(self.handle) {
            return f();
        }
        let handle = self.handle;
        self.writer
            .spawn(move || {
                let previous = ACTIVE_WRITER.with(|cell| cell.replace(Some(handle)));
                let result = f();
                ACTIVE_WRITER.with(|cell| cell.set(previous));
                result
            })
            .wait()
            .expect("context writer task is gone")
    }

    /// Runs `f` inside this Context's writer task, giving it a `&Context`
    /// it can issue any number of ordinary calls (`emplace`, `assign`, ...)
    /// against — each one is serialised with every other write as usual,
    /// but the whole closure runs as a single atomic unit with respect to
    /// other callers, since no other job can interleave on the one-worker
    /// writer while this one holds it (spec §4.8: `World.context(fun)`,
    /// "runs a closure inside the World's writer task to allow compound
    /// atomic writes").
    pub fn transact<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        let ctx = self.clone();
        self.call(move || f(&ctx))
    }

    // ---- mutations (serialised through the writer) -------------------

    pub fn create(&self, opts: CreateOpts) -> Result<Entity, StoreError> {
        let tables = self.tables.clone();
        let context = self.handle;
        self.call(move || {
            if let Some(name) = &opts.name {
                if tables.nindex.contains_key(name) {
                    log::warn!("context: name already registered: {name}");
                    return Err(StoreError::NameAlreadyRegistered);
                }
            }
            let entity = Entity::new(context, opts.name.clone(), opts.parent, opts.world);
            let hash = entity.hash();
            if let Some(name) = &opts.name {
                tables.nindex.insert(name.clone(), hash);
            }
            tables.mtable.insert(
                hash,
                MEntry {
                    entity: entity.clone(),
                    types: HashSet::new(),
                    metadata: opts.metadata.unwrap_or_default(),
                    created_at: now(),
                },
            );
            tables.ctable.insert(hash, Vec::new());
            tables.aindex.insert(hash, Mask::empty());
            log::trace!("context: created entity {:?}", entity.hash());
            Ok(entity)
        })
    }

    pub fn emplace(&self, entity: Entity, component: ComponentValue) -> Result<(), StoreError> {
        let tables = self.tables.clone();
        self.call(move || {
            let hash = entity.hash();
            if !tables.mtable.contains_key(&hash) {
                return Err(StoreError::EntityNotFound);
            }
            {
                let mut entry = tables.mtable.get_mut(&hash).unwrap();
                if entry.types.contains(&component.type_id) {
                    log::warn!(
                        "context: component `{}` already inserted on {:?}",
                        component.alias,
                        hash
                    );
                    return Err(StoreError::AlreadyInserted);
                }
                entry.types.insert(component.type_id);
            }
            tables.remember_term(&component);
            tables
                .tindex
                .entry(component.type_id)
                .or_default()
                .push((hash, component.clone()));
            tables.ctable.entry(hash).or_default().push(component);
            tables.recompute_mask(hash);
            log::debug!("context: emplaced component on {:?}", hash);
            Ok(())
        })
    }

    pub fn replace(&self, entity: Entity, component: ComponentValue) -> Result<(), StoreError> {
        let tables = self.tables.clone();
        self.call(move || {
            let hash = entity.hash();
            let type_id = component.type_id;
            let has_type = tables
                .mtable
                .get(&hash)
                .map(|e| e.types.contains(&type_id))
                .ok_or(StoreError::EntityNotFound)?;
            if !has_type {
                return Err(StoreError::ComponentNotFound);
            }
            if let Some(mut row) = tables.ctable.get_mut(&hash) {
                if let Some(slot) = row.iter_mut().find(|cv| cv.type_id == type_id) {
                    *slot = component.clone();
                }
            }
            if let Some(mut row) = tables.tindex.get_mut(&type_id) {
                if let Some(slot) = row.iter_mut().find(|(h, _)| *h == hash) {
                    slot.1 = component;
                }
            }
            log::debug!("context: replaced component on {:?}", hash);
            Ok(())
        })
    }

    /// `kind = None` erases every component; `kind = Some(type)` erases only
    /// that one.
    pub fn erase(&self, entity: Entity, kind: Option<TypeId>) -> Result<(), StoreError> {
        let tables = self.tables.clone();
        self.call(move || {
            let hash = entity.hash();
            if !tables.mtable.contains_key(&hash) {
                return Err(StoreError::EntityNotFound);
            }
            match kind {
                None => {
                    if let Some((_, row)) = tables.ctable.remove(&hash) {
                        for cv in &row {
                            if let Some(mut t) = tables.tindex.get_mut(&cv.type_id) {
                                t.retain(|(h, _)| *h != hash);
                            }
                        }
                    }
                    tables.ctable.insert(hash, Vec::new());
                    if let Some(mut entry) = tables.mtable.get_mut(&hash) {
                        entry.types.clear();
                    }
                    tables.aindex.insert(hash, Mask::empty());
                }
                Some(type_id) => {
                    let had = tables
                        .mtable
                        .get(&hash)
                        .map(|e| e.types.contains(&type_id))
                        .unwrap_or(false);
                    if !had {
                        return Err(StoreError::ComponentNotFound);
                    }
                    if let Some(mut row) = tables.ctable.get_mut(&hash) {
                        row.retain(|cv| cv.type_id != type_id);
                    }
                    if let Some(mut row) = tables.tindex.get_mut(&type_id) {
                        row.retain(|(h, _)| *h != hash);
                    }
                    if let Some(mut entry) = tables.mtable.get_mut(&hash) {
                        entry.types.remove(&type_id);
                    }
                    tables.recompute_mask(hash);
                }
            }
            log::debug!("context: erased component(s) on {:?}", hash);
            Ok(())
        })
    }

    /// Replaces the entity's entire component set in one call.
    pub fn assign(&self, entity: Entity, components: Vec<ComponentValue>) -> Result<(), StoreError> {
        let tables = self.tables.clone();
        self.call(move || {
            let hash = entity.hash();
            if !tables.mtable.contains_key(&hash) {
                return Err(StoreError::EntityNotFound);
            }
            if let Some((_, old)) = tables.ctable.remove(&hash) {
                for cv in &old {
                    if let Some(mut t) = tables.tindex.get_mut(&cv.type_id) {
                        t.retain(|(h, _)| *h != hash);
                    }
                }
            }
            let mut types = HashSet::with_capacity(components.len());
            let mut mask = Mask::empty();
            for cv in &components {
                tables.remember_term(cv);
                types.insert(cv.type_id);
                mask.merge(&cv.bloom_term());
                tables
                    .tindex
                    .entry(cv.type_id)
                    .or_default()
                    .push((hash, cv.clone()));
            }
            tables.ctable.insert(hash, components);
            if let Some(mut entry) = tables.mtable.get_mut(&hash) {
                entry.types = types;
            }
            tables.aindex.insert(hash, mask);
            log::debug!("context: assigned {} component(s) to {:?}", tables.ctable.get(&hash).map(|r| r.len()).unwrap_or(0), hash);
            Ok(())
        })
    }

    pub fn patch(&self, entity: Entity, metadata: PropMap) -> Result<(), StoreError> {
        let tables = self.tables.clone();
        self.call(move || {
            let hash = entity.hash();
            match tables.mtable.get_mut(&hash) {
                Some(mut entry) => {
                    entry.metadata = metadata;
                    Ok(())
                }
                None => Err(StoreError::EntityNotFound),
            }
        })
    }

    pub fn destroy(&self, entity: Entity) -> Result<(), StoreError> {
        let tables = self.tables.clone();
        self.call(move || {
            let hash = entity.hash();
            let removed = tables.mtable.remove(&hash);
            let Some((_, entry)) = removed else {
                return Err(StoreError::EntityNotFound);
            };
            if let Some(name) = entry.entity.name() {
                tables.nindex.remove(name);
            }
            if let Some((_, row)) = tables.ctable.remove(&hash) {
                for cv in &row {
                    if let Some(mut t) = tables.tindex.get_mut(&cv.type_id) {
                        t.retain(|(h, _)| *h != hash);
                    }
                }
            }
            tables.aindex.remove(&hash);
            log::debug!("context: destroyed {:?}", hash);
            Ok(())
        })
    }

    pub fn clear(&self) {
        let tables = self.tables.clone();
        self.call(move || {
            tables.clear();
        });
    }

    // ---- dirty reads (bypass the writer) ------------------------------

    pub fn info(&self, key: impl Into<Key<'_>>) -> Option<Info> {
        let hash = self.tables.resolve(&key.into())?;
        self.tables.mtable.get(&hash).map(|e| Info {
            entity: e.entity.clone(),
            types: e.types.clone(),
            metadata: e.metadata.clone(),
            created_at: e.created_at,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Info> {
        self.info(Key::Name(name))
    }

    pub fn exists(&self, key: impl Into<Key<'_>>) -> bool {
        self.tables
            .resolve(&key.into())
            .map(|h| self.tables.mtable.contains_key(&h))
            .unwrap_or(false)
    }

    pub fn fetch(&self, key: impl Into<Key<'_>>) -> Option<(Entity, Vec<ComponentValue>)> {
        let hash = self.tables.resolve(&key.into())?;
        let entity = self.tables.mtable.get(&hash)?.entity.clone();
        let components = self.tables.ctable.get(&hash).map(|r| r.clone()).unwrap_or_default();
        Some((entity, components))
    }

    /// `get(entity, T, default)` (spec §4.3): single-row lookup, falling
    /// back to `default` when the entity has no component of that type.
    pub fn get_raw(&self, entity: &Entity, type_id: TypeId) -> Option<ComponentValue> {
        self.tables
            .ctable
            .get(&entity.hash())?
            .iter()
            .find(|cv| cv.type_id == type_id)
            .cloned()
    }

    pub fn children_of(&self, entity: &Entity) -> Vec<Entity> {
        let hash = entity.hash();
        self.tables
            .mtable
            .iter()
            .filter(|kv| kv.entity.parent().map(|p| p.hash() == hash).unwrap_or(false))
            .map(|kv| kv.entity.clone())
            .collect()
    }

    // ---- type-indexed range queries ------------------------------------

    pub fn all(&self, type_id: TypeId) -> Vec<(Entity, ComponentValue)> {
        self.tindex_rows(type_id)
    }

    pub fn match_props(&self, type_id: TypeId, properties: &PropMap) -> Result<Vec<(Entity, ComponentValue)>, ShapeError> {
        if properties.is_empty() {
            return Err(ShapeError::EmptyProperties);
        }
        Ok(self
            .tindex_rows(type_id)
            .into_iter()
            .filter(|(_, cv)| properties.iter().all(|(k, v)| cv.props.get(k) == Some(v)))
            .collect())
    }

    pub fn at_least(&self, type_id: TypeId, prop: &str, value: f64) -> Vec<(Entity, ComponentValue)> {
        self.tindex_rows(type_id)
            .into_iter()
            .filter(|(_, cv)| numeric(&cv.props, prop).map(|n| n >= value).unwrap_or(false))
            .collect()
    }

    pub fn at_most(&self, type_id: TypeId, prop: &str, value: f64) -> Vec<(Entity, ComponentValue)> {
        self.tindex_rows(type_id)
            .into_iter()
            .filter(|(_, cv)| numeric(&cv.props, prop).map(|n| n <= value).unwrap_or(false))
            .collect()
    }

    pub fn between(&self, type_id: TypeId, prop: &str, lo: f64, hi: f64) -> Result<Vec<(Entity, ComponentValue)>, ShapeError> {
        if lo > hi {
            return Err(ShapeError::EmptyRange);
        }
        Ok(self
            .tindex_rows(type_id)
            .into_iter()
            .filter(|(_, cv)| {
                numeric(&cv.props, prop)
                    .map(|n| n >= lo && n <= hi)
                    .unwrap_or(false)
            })
            .collect())
    }

    fn tindex_rows(&self, type_id: TypeId) -> Vec<(Entity, ComponentValue)> {
        let Some(rows) = self.tables.tindex.get(&type_id) else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|(hash, cv)| {
                self.tables
                    .mtable
                    .get(hash)
                    .map(|e| (e.entity.clone(), cv.clone()))
            })
            .collect()
    }

    // ---- set-composition (archetype) queries ---------------------------

    /// `all_of`/`any_of`/`none_of`/`search` (spec §4.3): OR the bloom term
    /// of each type in `all`/`any`/`none` into three masks, filter `aindex`
    /// by them, then verify `all`/`any` survivors against the entity's exact
    /// type set (bloom admits false positives, never false negatives —
    /// P5). `none` needs no verification: a mask bit that's clear can't
    /// hide a true positive.
    pub fn search(&self, all: &[TypeId], any: &[TypeId], none: &[TypeId]) -> Vec<Entity> {
        let mask_all = self.mask_of(all);
        let mask_any = self.mask_of(any);
        let mask_none = self.mask_of(none);

        let mut out = Vec::new();
        for kv in self.tables.aindex.iter() {
            let hash = *kv.key();
            let mask = kv.value();

            if !all.is_empty() && !mask.contains_all(&mask_all) {
                continue;
            }
            if !any.is_empty() && !mask.intersects(&mask_any) {
                continue;
            }
            if !none.is_empty() && mask.intersects(&mask_none) {
                continue;
            }

            let Some(entry) = self.tables.mtable.get(&hash) else {
                continue;
            };
            if !all.is_empty() && !all.iter().all(|t| entry.types.contains(t)) {
                continue;
            }
            if !any.is_empty() && !any.iter().any(|t| entry.types.contains(t)) {
                continue;
            }
            out.push(entry.entity.clone());
        }
        out
    }

    pub fn all_of(&self, types: &[TypeId]) -> Vec<Entity> {
        self.search(types, &[], &[])
    }

    pub fn any_of(&self, types: &[TypeId]) -> Vec<Entity> {
        self.search(&[], types, &[])
    }

    pub fn none_of(&self, types: &[TypeId]) -> Vec<Entity> {
        self.search(&[], &[], types)
    }

    fn mask_of(&self, types: &[TypeId]) -> Mask {
        let mut mask = Mask::empty();
        for t in types {
            if let Some(term) = self.tables.type_terms.get(t) {
                mask.merge(&term);
            }
        }
        mask
    }

    // ---- streams --------------------------------------------------------
    // `DashMap` gives O(1) random access, so joining metadata against the
    // component tables collapses to a direct per-entity lookup rather than
    // a sequential merge. The snapshot below is a clone taken under the
    // map's internal shard locks, which releases on every exit path for
    // free because it's owned data, not a borrowed guard.

    pub fn metadata(&self) -> Vec<(Entity, PropMap)> {
        self.tables
            .mtable
            .iter()
            .map(|kv| (kv.entity.clone(), kv.metadata.clone()))
            .collect()
    }

    pub fn components(&self) -> Vec<(Entity, ComponentValue)> {
        self.tables
            .mtable
            .iter()
            .flat_map(|kv| {
                let entity = kv.entity.clone();
                self.tables
                    .ctable
                    .get(&kv.entity.hash())
                    .map(|row| row.iter().map(|cv| (entity.clone(), cv.clone())).collect::<Vec<_>>())
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn entities(&self) -> Vec<(Entity, Vec<ComponentValue>)> {
        self.tables
            .mtable
            .iter()
            .filter_map(|kv| {
                let row = self.tables.ctable.get(&kv.entity.hash())?;
                if row.len() == kv.types.len() {
                    Some((kv.entity.clone(), row.clone()))
                } else {
                    // Dirty read caught mid-mutation: types/ctable disagree
                    // transiently. Skip rather than emit an inconsistent row.
                    None
                }
            })
            .collect()
    }
}

fn numeric(props: &PropMap, key: &str) -> Option<f64> {
    props.get(key).and_then(|v| v.as_f64())
}
