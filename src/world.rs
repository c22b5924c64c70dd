//! `World`: the façade binding one [`Context`] to one dispatch [`Pipeline`]
//! and one [`Registry`] (spec §4.8). This is the crate's only public entry
//! point most callers need — `Context`/`Registry`/`Pipeline` stay
//! independently testable, but a real game loop talks to a `World`.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::component::{ComponentDescriptor, ComponentValue, PropMap};
use crate::context::{Context, CreateOpts, Key};
use crate::entity::{Entity, Hash160, WorldHandle};
use crate::error::{Fault, ManagerError, RegistryError, ShapeError, StoreError};
use crate::event::Event;
use crate::pipeline::Pipeline;
use crate::registry::Registry;

/// Options accepted by [`World::new`]/[`World::with_options`] (spec §6:
/// "Recognised World options").
#[derive(Debug, Clone)]
pub struct WorldOptions {
    /// Number of Envoy/Scribe partitions. Default: available parallelism.
    pub partitions: usize,
    /// Per-partition in-flight batch cap, enforced by the bounded channel
    /// feeding each Scribe. Default: 1000.
    pub max_events: usize,
}

impl Default for WorldOptions {
    fn default() -> Self {
        let partitions = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        WorldOptions {
            partitions,
            max_events: 1000,
        }
    }
}

/// `World::list`'s output shape (spec §4.8: `list(format: list|map)`).
#[derive(Debug, Clone)]
pub enum Listing {
    List(Vec<Entity>),
    Map(HashMap<Hash160, Entity>),
}

/// Which shape [`World::list`] should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    List,
    Map,
}

/// Overrides accepted by [`World::clone_entity`]/[`World::create_from_prefab`]:
/// a property map per component alias, applied on top of the source/prefab's
/// own properties (spec §4.4 step 4 — one-level merge, child/override wins).
pub type Overrides = HashMap<String, PropMap>;

/// Binds a [`Context`] (storage), a [`Registry`] (component/prefab/handler
/// catalogue), and a [`Pipeline`] (dispatch) into the single façade a caller
/// actually uses.
pub struct World {
    handle: WorldHandle,
    context: Context,
    registry: Arc<Registry>,
    pipeline: Pipeline,
}

impl World {
    /// A World with a fresh, private [`Registry`] and default options.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(Registry::new()), WorldOptions::default())
    }

    pub fn with_options(options: WorldOptions) -> Self {
        Self::with_registry(Arc::new(Registry::new()), options)
    }

    /// A World sharing an existing [`Registry`] — e.g. several Worlds in one
    /// process that should see the same component catalogue and prefabs.
    pub fn with_registry(registry: Arc<Registry>, options: WorldOptions) -> Self {
        let handle = crate::entity::fresh_world_handle();
        let partitions = options.partitions.max(1);
        let pipeline = Pipeline::new(partitions, options.max_events, Arc::clone(&registry));
        log::info!("world: started (partitions={partitions}, max_events={})", options.max_events);
        World {
            handle,
            context: Context::new(None),
            registry,
            pipeline,
        }
    }

    #[inline]
    pub fn handle(&self) -> WorldHandle {
        self.handle
    }

    /// Escape hatch: a raw `Context` handle for dirty reads (spec §4.8:
    /// `World.context()`).
    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Escape hatch: runs `f` inside the World's writer task so a caller can
    /// issue several Context mutations as one atomic unit (spec §4.8:
    /// `World.context(fun)`).
    pub fn transact<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.context.transact(f)
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    // ---- component/prefab registration passthroughs --------------------

    pub fn register_components(&self, descriptors: Vec<ComponentDescriptor>) -> Result<(), RegistryError> {
        self.registry.register_components(descriptors)
    }

    pub fn register_prefab(&self, attrs: crate::prefab::PrefabAttrs) -> Result<Entity, ManagerError> {
        self.registry.register_prefab(attrs)
    }

    // ---- entity lifecycle -----------------------------------------------

    /// Creates a bare entity with no components.
    pub fn create(&self) -> Entity {
        self.context
            .create(CreateOpts {
                world: Some(self.handle),
                ..Default::default()
            })
            .expect("create with no name cannot conflict")
    }

    /// Creates a named entity; fails if the name is already taken in this
    /// World's Context.
    pub fn create_named(&self, name: impl Into<String>) -> Result<Entity, StoreError> {
        self.context.create(CreateOpts {
            name: Some(name.into()),
            world: Some(self.handle),
            ..Default::default()
        })
    }

    /// Materialises a prefab template: fetches it from the Registry's
    /// Prefabs catalogue and runs the clone algorithm into this World's
    /// Context, applying `overrides` (spec §4.8: `create(prefab_name,
    /// overrides?)`, §4.4 clone algorithm).
    pub fn create_from_prefab(&self, prefab_name: &str, overrides: Overrides) -> Result<Entity, ManagerError> {
        let (prefab_entity, _) = self
            .registry
            .prefabs()
            .fetch(Key::Name(prefab_name))
            .ok_or_else(|| RegistryError::UnknownPrefab(prefab_name.to_string()))?;
        let entity = self
            .registry
            .clone_into(self.registry.prefabs(), &self.context, &prefab_entity, &overrides)?;
        Ok(entity)
    }

    /// Clones a live entity within this World, applying `overrides` on top
    /// of its current properties (spec §4.4 clone algorithm).
    pub fn clone_entity(&self, entity: &Entity, overrides: Overrides) -> Result<Entity, ManagerError> {
        self.registry.clone_into(&self.context, &self.context, entity, &overrides)
    }

    pub fn destroy(&self, entity: Entity) -> Result<(), StoreError> {
        self.context.destroy(entity)
    }

    pub fn fetch(&self, entity: &Entity) -> Option<(Entity, Vec<ComponentValue>)> {
        self.context.fetch(entity)
    }

    pub fn exists(&self, key: impl Into<Key<'_>>) -> bool {
        self.context.exists(key)
    }

    /// Every live entity in this World's Context, as a flat list or keyed by
    /// hash (spec §4.8: `list(format: list|map)`).
    pub fn list(&self, format: ListFormat) -> Listing {
        let entities = self.context.metadata().into_iter().map(|(entity, _)| entity);
        match format {
            ListFormat::List => Listing::List(entities.collect()),
            ListFormat::Map => Listing::Map(entities.map(|e| (e.hash(), e)).collect()),
        }
    }

    // ---- component attach/update/detach (descriptor-aware, via Registry) -

    pub fn attach(&self, entity: Entity, alias: &str, props: PropMap) -> Result<(), ManagerError> {
        self.registry.attach(&self.context, entity, alias, props)
    }

    pub fn update(&self, entity: Entity, alias: &str, props: PropMap) -> Result<(), ManagerError> {
        self.registry.update(&self.context, entity, alias, props)
    }

    pub fn detach(&self, entity: Entity, alias: &str) -> Result<(), ManagerError> {
        self.registry.detach(&self.context, entity, alias)
    }

    // ---- query passthroughs (spec §4.8) ----------------------------------

    pub fn all(&self, type_id: TypeId) -> Vec<(Entity, ComponentValue)> {
        self.context.all(type_id)
    }

    pub fn match_props(&self, type_id: TypeId, properties: &PropMap) -> Result<Vec<(Entity, ComponentValue)>, ShapeError> {
        self.context.match_props(type_id, properties)
    }

    pub fn at_least(&self, type_id: TypeId, prop: &str, value: f64) -> Vec<(Entity, ComponentValue)> {
        self.context.at_least(type_id, prop, value)
    }

    pub fn at_most(&self, type_id: TypeId, prop: &str, value: f64) -> Vec<(Entity, ComponentValue)> {
        self.context.at_most(type_id, prop, value)
    }

    pub fn between(&self, type_id: TypeId, prop: &str, lo: f64, hi: f64) -> Result<Vec<(Entity, ComponentValue)>, ShapeError> {
        self.context.between(type_id, prop, lo, hi)
    }

    pub fn all_of(&self, types: &[TypeId]) -> Vec<Entity> {
        self.context.all_of(types)
    }

    pub fn any_of(&self, types: &[TypeId]) -> Vec<Entity> {
        self.context.any_of(types)
    }

    pub fn none_of(&self, types: &[TypeId]) -> Vec<Entity> {
        self.context.none_of(types)
    }

    pub fn search(&self, all: &[TypeId], any: &[TypeId], none: &[TypeId]) -> Vec<Entity> {
        self.context.search(all, any, none)
    }

    // ---- dispatch ---------------------------------------------------------

    /// Looks up `entity`'s current component types, intersects them with
    /// `event_name`'s registered handler order to produce the concrete
    /// `handlers` list, builds an [`Event`], and hands it to the Herald
    /// (spec §4.8: `send(entity, event_name, args)`).
    pub fn send(&self, entity: &Entity, event_name: &str, args: PropMap) -> Result<(), StoreError> {
        let info = self.context.info(entity).ok_or(StoreError::EntityNotFound)?;
        let registered = self.registry.handlers_for(event_name);
        let handlers: Vec<TypeId> = registered.into_iter().filter(|t| info.types.contains(t)).collect();
        let event = Event::new(event_name, self.handle, entity.clone(), args, handlers);
        log::debug!("world: sending `{event_name}` to {:?} ({} handler(s))", entity.hash(), event.handlers.len());
        self.pipeline.send(event);
        Ok(())
    }

    /// Blocks until every in-flight/queued event has been handled, or
    /// `timeout` elapses (spec §5 "Cancellation & timeouts": the one
    /// outward call the spec names; see SPEC_FULL.md §2.2).
    pub fn flush(&self, timeout: Duration) -> Result<(), Fault> {
        self.pipeline.flush(timeout)
    }

    pub fn partitions(&self) -> usize {
        self.pipeline.partitions()
    }
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Handler};
    use crate::event::Outcome;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Position {
        x: i64,
        y: i64,
    }
    impl Component for Position {
        fn alias() -> &'static str {
            "position"
        }
        fn events() -> &'static [&'static str] {
            &[]
        }
    }

    static CALL_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Ping {}
    impl Component for Ping {
        fn alias() -> &'static str {
            "ping"
        }
        fn events() -> &'static [&'static str] {
            &["check"]
        }
    }
    impl Handler for Ping {
        fn handle_event(_name: &str, event: Event) -> (Outcome, Event) {
            CALL_LOG.lock().unwrap().push("ping");
            (Outcome::Continue, event)
        }
    }

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Pong {}
    impl Component for Pong {
        fn alias() -> &'static str {
            "pong"
        }
        fn events() -> &'static [&'static str] {
            &["check"]
        }
    }
    impl Handler for Pong {
        fn handle_event(_name: &str, event: Event) -> (Outcome, Event) {
            CALL_LOG.lock().unwrap().push("pong");
            (Outcome::Continue, event)
        }
    }

    #[test]
    fn create_fetch_destroy_round_trip() {
        // Given
        let world = World::with_options(WorldOptions { partitions: 2, max_events: 16 });
        let entity = world.create();

        // When
        world.attach(entity.clone(), "position", PropMap::new()).unwrap_err();
        // (no component registered yet; attach on an unknown alias fails)

        // Then
        assert!(world.exists(&entity));
        world.destroy(entity.clone()).unwrap();
        assert!(!world.exists(&entity));
    }

    #[test]
    fn send_dispatches_in_registration_order() {
        // Scenario 2 / P6
        // Given
        CALL_LOG.lock().unwrap().clear();
        let world = World::with_options(WorldOptions { partitions: 1, max_events: 16 });
        world
            .register_components(vec![ComponentDescriptor::with_handler::<Ping>(), ComponentDescriptor::with_handler::<Pong>()])
            .unwrap();
        let entity = world.create();
        world.attach(entity.clone(), "ping", PropMap::new()).unwrap();
        world.attach(entity.clone(), "pong", PropMap::new()).unwrap();

        // When
        world.send(&entity, "check", PropMap::new()).unwrap();
        world.flush(Duration::from_secs(1)).unwrap();

        // Then
        assert_eq!(*CALL_LOG.lock().unwrap(), vec!["ping", "pong"]);
    }

    #[test]
    fn send_to_unknown_entity_fails() {
        let world = World::new();
        let ghost = world.create();
        world.destroy(ghost.clone()).unwrap();

        let err = world.send(&ghost, "check", PropMap::new()).unwrap_err();
        assert_eq!(err, StoreError::EntityNotFound);
    }

    #[test]
    fn prefab_inheritance_materialises_merged_entity() {
        // Scenario 5
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
        struct Health {
            current: i64,
            maximum: i64,
        }
        impl Component for Health {
            fn alias() -> &'static str {
                "health"
            }
            fn events() -> &'static [&'static str] {
                &[]
            }
        }
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
        struct Selectable {}
        impl Component for Selectable {
            fn alias() -> &'static str {
                "selectable"
            }
            fn events() -> &'static [&'static str] {
                &[]
            }
        }

        let world = World::new();
        world
            .register_components(vec![
                ComponentDescriptor::new::<Health>(),
                ComponentDescriptor::new::<Position>(),
                ComponentDescriptor::new::<Selectable>(),
            ])
            .unwrap();

        let mut being = crate::prefab::PrefabAttrs::new("Being");
        let mut health_props = PropMap::new();
        health_props.insert("current".into(), json!(100));
        health_props.insert("maximum".into(), json!(100));
        being = being.with("health", health_props);
        let mut position_props = PropMap::new();
        position_props.insert("x".into(), json!(10));
        position_props.insert("y".into(), json!(20));
        being = being.with("position", position_props).with("selectable", PropMap::new());
        world.register_prefab(being).unwrap();

        let mut human = crate::prefab::PrefabAttrs::new("Human").extends(["Being"]);
        let mut health_override = PropMap::new();
        health_override.insert("current".into(), json!(50));
        human = human.with("health", health_override);
        let mut position_override = PropMap::new();
        position_override.insert("x".into(), json!(100));
        position_override.insert("y".into(), json!(200));
        human = human.with("position", position_override);
        world.register_prefab(human).unwrap();

        // When
        let entity = world.create_from_prefab("Human", Overrides::new()).unwrap();

        // Then
        let (_, components) = world.fetch(&entity).unwrap();
        let health = components.iter().find(|cv| cv.alias == "health").unwrap();
        assert_eq!(health.props.get("current"), Some(&json!(50)));
        assert_eq!(health.props.get("maximum"), Some(&json!(100)));
        let position = components.iter().find(|cv| cv.alias == "position").unwrap();
        assert_eq!(position.props.get("x"), Some(&json!(100)));
        assert!(components.iter().any(|cv| cv.alias == "selectable"));
    }

    #[test]
    fn create_from_unknown_prefab_fails() {
        let world = World::new();
        let err = world.create_from_prefab("Ghost", Overrides::new()).unwrap_err();
        assert_eq!(err, ManagerError::Registry(RegistryError::UnknownPrefab("Ghost".to_string())));
    }

    #[test]
    fn list_returns_every_live_entity() {
        let world = World::new();
        let e1 = world.create();
        let e2 = world.create();

        match world.list(ListFormat::List) {
            Listing::List(entities) => {
                assert_eq!(entities.len(), 2);
                assert!(entities.iter().any(|e| e.equal(&e1)));
                assert!(entities.iter().any(|e| e.equal(&e2)));
            }
            _ => panic!("expected a list"),
        }

        match world.list(ListFormat::Map) {
            Listing::Map(map) => {
                assert_eq!(map.len(), 2);
                assert!(map.contains_key(&e1.hash()));
            }
            _ => panic!("expected a map"),
        }
    }

    #[test]
    fn per_entity_events_are_handled_in_send_order() {
        // Scenario 3 / P7
        #[derive(Serialize, Deserialize, Clone, Debug)]
        struct Recorder {}
        impl Component for Recorder {
            fn alias() -> &'static str {
                "recorder"
            }
            fn events() -> &'static [&'static str] {
                &["first", "second"]
            }
        }
        impl Handler for Recorder {
            fn handle_event(name: &str, event: Event) -> (Outcome, Event) {
                if name == "first" {
                    std::thread::sleep(Duration::from_millis(50));
                }
                ORDER_LOG.lock().unwrap().push(name.to_string());
                (Outcome::Continue, event)
            }
        }
        static ORDER_LOG: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let world = World::with_options(WorldOptions { partitions: 1, max_events: 16 });
        world.register_components(vec![ComponentDescriptor::with_handler::<Recorder>()]).unwrap();
        let entity = world.create();
        world.attach(entity.clone(), "recorder", PropMap::new()).unwrap();

        // When - sent back-to-back by the same caller
        world.send(&entity, "first", PropMap::new()).unwrap();
        world.send(&entity, "second", PropMap::new()).unwrap();
        world.flush(Duration::from_secs(1)).unwrap();

        // Then - "second" waited for "first" despite its own handler being
        // instantaneous, because both land on the same entity's lane.
        assert_eq!(*ORDER_LOG.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn flush_eventually_observes_completion_of_independent_entities() {
        // Scenario 4 / P8 (partition-independent smoke check; the envoy-
        // level test in pipeline::mod covers the deterministic single-
        // partition timeout case).
        let world = World::with_options(WorldOptions { partitions: 4, max_events: 16 });
        world.register_components(vec![ComponentDescriptor::with_handler::<Ping>()]).unwrap();
        CALL_LOG.lock().unwrap().clear();

        let e1 = world.create();
        world.attach(e1.clone(), "ping", PropMap::new()).unwrap();
        let e2 = world.create();
        world.attach(e2.clone(), "ping", PropMap::new()).unwrap();

        world.send(&e1, "check", PropMap::new()).unwrap();
        world.send(&e2, "check", PropMap::new()).unwrap();
        world.flush(Duration::from_secs(1)).unwrap();

        assert_eq!(CALL_LOG.lock().unwrap().len(), 2);
    }
}
