//! The Manager: process-wide-but-instantiable component catalogue, the
//! event-handler lookup every dispatch consults, and the prefab catalogue
//! (spec §4.4-§4.5).
//!
//! A `DashMap<TypeId, _>` catalogue plus a cell optimised for cheap
//! concurrent reads — the read-heavy structure here is `arc-swap`'s
//! `ArcSwap` rather than an `RwLock`: dispatch reads the event-handler order
//! on every single event, and registration only writes it in small batches,
//! which is exactly the read-mostly shape `ArcSwap`'s snapshot-and-replace
//! model is built for.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::component::{ComponentDescriptor, ComponentValue, Hook, PropMap};
use crate::context::{Context, CreateOpts, Key};
use crate::entity::Entity;
use crate::error::{ManagerError, RegistryError, StoreError};
use crate::prefab::{merge_one_level, PrefabAttrs};

/// Component/prefab/handler registry. One per [`crate::world::World`],
/// though nothing stops a test from instantiating several — the spec's
/// design notes call this out explicitly: "a clean implementation exposes
/// a `Registry` value; tests instantiate their own."
pub struct Registry {
    descriptors: DashMap<TypeId, ComponentDescriptor>,
    aliases: DashMap<&'static str, TypeId>,
    event_handlers: ArcSwap<HashMap<String, Vec<TypeId>>>,
    prefabs: Context,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            descriptors: DashMap::new(),
            aliases: DashMap::new(),
            event_handlers: ArcSwap::from_pointee(HashMap::new()),
            prefabs: Context::new(Some("Prefabs".to_string())),
        }
    }

    /// The dedicated "Prefabs" Context backing the prefab catalogue.
    /// `World` reaches through here to fetch a prefab template entity by
    /// name when materialising `create(prefab_name, overrides)`.
    pub fn prefabs(&self) -> &Context {
        &self.prefabs
    }

    // ---- component catalogue -------------------------------------------

    /// Registers a batch of component descriptors. Rejects the whole batch,
    /// leaving the catalogue untouched, if any descriptor's alias is
    /// already known or repeated within the batch (spec §4.4: "duplicates
    /// ... are rejected with a distinct error").
    pub fn register_components(&self, descriptors: Vec<ComponentDescriptor>) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for d in &descriptors {
            if self.aliases.contains_key(d.alias()) || !seen.insert(d.alias()) {
                log::warn!("registry: component alias already registered: {}", d.alias());
                return Err(RegistryError::AlreadyRegistered);
            }
        }

        for descriptor in descriptors {
            let alias = descriptor.alias();
            let type_id = descriptor.type_id();
            let events = descriptor.events();
            self.aliases.insert(alias, type_id);
            self.descriptors.insert(type_id, descriptor);
            self.append_handlers(type_id, events);
            log::info!("registry: registered component `{alias}`");
        }
        Ok(())
    }

    /// Appends `type_id` to every named event's handler list — never
    /// prepends, so registration order is preserved across batches — via a
    /// read-copy-update on the snapshot cell.
    fn append_handlers(&self, type_id: TypeId, events: &'static [&'static str]) {
        self.event_handlers.rcu(|current| {
            let mut next = (**current).clone();
            for event in events {
                next.entry((*event).to_string()).or_default().push(type_id);
            }
            next
        });
        log::debug!("registry: event-handler snapshot swapped");
    }

    pub fn type_for_alias(&self, alias: &str) -> Option<TypeId> {
        self.aliases.get(alias).map(|id| *id)
    }

    pub fn descriptor(&self, type_id: TypeId) -> Option<ComponentDescriptor> {
        self.descriptors.get(&type_id).map(|d| d.clone())
    }

    /// The component types registered as handlers of `event_name`, in
    /// registration order.
    pub fn handlers_for(&self, event_name: &str) -> Vec<TypeId> {
        self.event_handlers.load().get(event_name).cloned().unwrap_or_default()
    }

    /// Clears the component catalogue, the event-handler lookup, and the
    /// prefab catalogue. Used for testing (spec §4.4) — there is no
    /// partial-reset option.
    pub fn reset(&self) {
        self.descriptors.clear();
        self.aliases.clear();
        self.event_handlers.store(Arc::new(HashMap::new()));
        self.prefabs.clear();
        log::info!("registry: reset");
    }

    // ---- attach/update/detach: the descriptor-aware mutation wrappers --
    // `Context` deliberately never learns about `ComponentDescriptor` (it
    // only ever sees an already-built `ComponentValue`), so `on_hook` firing
    // has to live one layer up, here, where both the descriptor and the
    // target `Context` are in hand.

    /// Resolves `alias` to a descriptor, constructs a component from
    /// `props`, emplaces it on `entity` in `ctx`, and fires
    /// `on_hook(Attached, ...)`.
    pub fn attach(&self, ctx: &Context, entity: Entity, alias: &str, props: PropMap) -> Result<(), ManagerError> {
        let descriptor = self.descriptor_for_alias(alias)?;
        let value = descriptor.construct(props)?;
        ctx.emplace(entity.clone(), value.clone())?;
        descriptor.on_hook(Hook::Attached, &entity, &value);
        Ok(())
    }

    /// As [`Registry::attach`], but replaces an already-present component
    /// and fires `on_hook(Updated, ...)`.
    pub fn update(&self, ctx: &Context, entity: Entity, alias: &str, props: PropMap) -> Result<(), ManagerError> {
        let descriptor = self.descriptor_for_alias(alias)?;
        let value = descriptor.construct(props)?;
        ctx.replace(entity.clone(), value.clone())?;
        descriptor.on_hook(Hook::Updated, &entity, &value);
        Ok(())
    }

    /// Removes `alias`'s component from `entity` and fires
    /// `on_hook(Removed, ...)` with the value that was removed.
    pub fn detach(&self, ctx: &Context, entity: Entity, alias: &str) -> Result<(), ManagerError> {
        let descriptor = self.descriptor_for_alias(alias)?;
        let removed = ctx.get_raw(&entity, descriptor.type_id());
        ctx.erase(entity.clone(), Some(descriptor.type_id()))?;
        if let Some(value) = removed {
            descriptor.on_hook(Hook::Removed, &entity, &value);
        }
        Ok(())
    }

    fn descriptor_for_alias(&self, alias: &str) -> Result<ComponentDescriptor, RegistryError> {
        let type_id = self
            .type_for_alias(alias)
            .ok_or_else(|| RegistryError::UnknownAlias(alias.to_string()))?;
        Ok(self
            .descriptors
            .get(&type_id)
            .expect("alias resolved to an unregistered type")
            .clone())
    }

    // ---- prefab catalogue ------------------------------------------------

    /// Resolves and stores a prefab template (spec §4.5): flattens single-
    /// level inheritance, merges the child's declared properties one level
    /// over the inherited ones, instantiates each component, and assigns
    /// the list to a freshly created named entity in the Prefabs Context.
    pub fn register_prefab(&self, attrs: PrefabAttrs) -> Result<Entity, ManagerError> {
        if self.prefabs.exists(Key::Name(&attrs.name)) {
            return Err(RegistryError::AlreadyRegistered.into());
        }

        let mut inherited: HashMap<TypeId, PropMap> = HashMap::new();
        for parent_name in &attrs.extends {
            let (_, components) = self
                .prefabs
                .fetch(Key::Name(parent_name))
                .ok_or_else(|| RegistryError::UnknownParent(parent_name.clone()))?;
            for cv in components {
                inherited.insert(cv.type_id, cv.props);
            }
        }

        let mut merged = inherited.clone();
        for (alias, props) in &attrs.components {
            let type_id = self
                .type_for_alias(alias)
                .ok_or_else(|| RegistryError::UnknownAlias(alias.clone()))?;
            let combined = match inherited.get(&type_id) {
                Some(base) => merge_one_level(base, props),
                None => props.clone(),
            };
            merged.insert(type_id, combined);
        }

        let components = self.instantiate(merged)?;

        let mut metadata = PropMap::new();
        metadata.insert(
            "extends".to_string(),
            serde_json::Value::Array(attrs.extends.iter().cloned().map(serde_json::Value::String).collect()),
        );

        let entity = self.prefabs.create(CreateOpts {
            name: Some(attrs.name.clone()),
            metadata: Some(metadata),
            ..Default::default()
        })?;
        self.prefabs.assign(entity.clone(), components)?;
        log::info!("registry: registered prefab `{}`", attrs.name);
        Ok(entity)
    }

    fn instantiate(&self, by_type: HashMap<TypeId, PropMap>) -> Result<Vec<ComponentValue>, ManagerError> {
        let mut components = Vec::with_capacity(by_type.len());
        for (type_id, props) in by_type {
            let descriptor = self
                .descriptors
                .get(&type_id)
                .expect("alias resolved to an unregistered type");
            components.push(descriptor.construct(props)?);
        }
        Ok(components)
    }

    // ---- clone algorithm (spec §4.4), shared by World::clone and
    // World::create(prefab_name, overrides) -----------------------------

    /// Fetches `source`'s components from `source_ctx`, creates a new
    /// entity in `target_ctx` with `parent = source`, merges `overrides`
    /// (keyed by component alias) on top, rebuilds every component from the
    /// merged properties, and assigns the list in one call.
    pub fn clone_into(
        &self,
        source_ctx: &Context,
        target_ctx: &Context,
        source: &Entity,
        overrides: &HashMap<String, PropMap>,
    ) -> Result<Entity, ManagerError> {
        let (_, source_components) = source_ctx.fetch(source).ok_or(StoreError::EntityNotFound)?;

        let mut by_type: HashMap<TypeId, PropMap> =
            source_components.into_iter().map(|cv| (cv.type_id, cv.props)).collect();

        for (alias, props) in overrides {
            let type_id = self
                .type_for_alias(alias)
                .ok_or_else(|| RegistryError::UnknownAlias(alias.clone()))?;
            let combined = match by_type.get(&type_id) {
                Some(base) => merge_one_level(base, props),
                None => props.clone(),
            };
            by_type.insert(type_id, combined);
        }

        let components = self.instantiate(by_type)?;

        let target = target_ctx.create(CreateOpts {
            parent: Some(source.clone()),
            world: source.world(),
            ..Default::default()
        })?;
        target_ctx.assign(target.clone(), components)?;
        Ok(target)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Handler, Hooked};
    use crate::event::{Event, Outcome};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Ping;
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
            (Outcome::Continue, event)
        }
    }

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Pong;
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
            (Outcome::Continue, event)
        }
    }

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

    static TAG_HOOKS: std::sync::Mutex<Vec<Hook>> = std::sync::Mutex::new(Vec::new());

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Tag {}
    impl Component for Tag {
        fn alias() -> &'static str {
            "tag"
        }
        fn events() -> &'static [&'static str] {
            &[]
        }
    }
    impl Hooked for Tag {
        fn on_hook(hook: Hook, _entity: &Entity, _component: &Self) {
            TAG_HOOKS.lock().unwrap().push(hook);
        }
    }

    fn registry_with_ping_pong() -> Registry {
        let registry = Registry::new();
        registry
            .register_components(vec![ComponentDescriptor::with_handler::<Ping>(), ComponentDescriptor::with_handler::<Pong>()])
            .unwrap();
        registry
    }

    #[test]
    fn register_components_rejects_duplicate_alias() {
        // Given
        let registry = Registry::new();
        registry.register_components(vec![ComponentDescriptor::new::<Ping>()]).unwrap();

        // When
        let err = registry.register_components(vec![ComponentDescriptor::new::<Ping>()]).unwrap_err();

        // Then
        assert_eq!(err, RegistryError::AlreadyRegistered);
    }

    #[test]
    fn handler_order_matches_registration_order() {
        // P6
        // Given
        let registry = registry_with_ping_pong();

        // When
        let handlers = registry.handlers_for("check");

        // Then
        assert_eq!(handlers, vec![TypeId::of::<Ping>(), TypeId::of::<Pong>()]);
    }

    #[test]
    fn attach_update_detach_fire_hooks_in_order() {
        // Given
        TAG_HOOKS.lock().unwrap().clear();
        let registry = Registry::new();
        registry.register_components(vec![ComponentDescriptor::with_hook::<Tag>()]).unwrap();
        let ctx = Context::new(None);
        let entity = ctx.create(CreateOpts::default()).unwrap();

        // When
        registry.attach(&ctx, entity.clone(), "tag", PropMap::new()).unwrap();
        registry.update(&ctx, entity.clone(), "tag", PropMap::new()).unwrap();
        registry.detach(&ctx, entity.clone(), "tag").unwrap();

        // Then
        assert_eq!(*TAG_HOOKS.lock().unwrap(), vec![Hook::Attached, Hook::Updated, Hook::Removed]);
        assert!(ctx.get_raw(&entity, TypeId::of::<Tag>()).is_none());
    }

    #[test]
    fn attach_rejects_unknown_alias() {
        let registry = Registry::new();
        let ctx = Context::new(None);
        let entity = ctx.create(CreateOpts::default()).unwrap();

        let err = registry.attach(&ctx, entity, "ghost", PropMap::new()).unwrap_err();
        assert_eq!(err, ManagerError::Registry(RegistryError::UnknownAlias("ghost".to_string())));
    }

    #[test]
    fn prefab_inheritance_merges_one_level() {
        // Scenario 5
        // Given
        let registry = Registry::new();
        registry
            .register_components(vec![
                ComponentDescriptor::new::<Health>(),
                ComponentDescriptor::new::<Position>(),
                ComponentDescriptor::new::<Selectable>(),
            ])
            .unwrap();

        let mut being = PrefabAttrs::new("Being");
        let mut health_props = PropMap::new();
        health_props.insert("current".into(), json!(100));
        health_props.insert("maximum".into(), json!(100));
        being = being.with("health", health_props);
        let mut position_props = PropMap::new();
        position_props.insert("x".into(), json!(10));
        position_props.insert("y".into(), json!(20));
        being = being.with("position", position_props).with("selectable", PropMap::new());
        registry.register_prefab(being).unwrap();

        let mut human = PrefabAttrs::new("Human").extends(["Being"]);
        let mut health_override = PropMap::new();
        health_override.insert("current".into(), json!(50));
        human = human.with("health", health_override);
        let mut position_override = PropMap::new();
        position_override.insert("x".into(), json!(100));
        position_override.insert("y".into(), json!(200));
        human = human.with("position", position_override);

        // When
        registry.register_prefab(human).unwrap();

        // Then
        let (_, components) = registry.prefabs().fetch("Human").unwrap();
        let health = components.iter().find(|cv| cv.alias == "health").unwrap();
        assert_eq!(health.props.get("current"), Some(&json!(50)));
        assert_eq!(health.props.get("maximum"), Some(&json!(100)));
        let position = components.iter().find(|cv| cv.alias == "position").unwrap();
        assert_eq!(position.props.get("x"), Some(&json!(100)));
        assert!(components.iter().any(|cv| cv.alias == "selectable"));
    }

    #[test]
    fn register_prefab_rejects_unknown_parent() {
        let registry = Registry::new();
        let err = registry
            .register_prefab(PrefabAttrs::new("Orphan").extends(["Nobody"]))
            .unwrap_err();
        assert_eq!(err, ManagerError::Registry(RegistryError::UnknownParent("Nobody".to_string())));
    }

    #[test]
    fn register_prefab_rejects_duplicate_name() {
        let registry = Registry::new();
        registry.register_prefab(PrefabAttrs::new("Thing")).unwrap();
        let err = registry.register_prefab(PrefabAttrs::new("Thing")).unwrap_err();
        assert_eq!(err, ManagerError::Registry(RegistryError::AlreadyRegistered));
    }

    #[test]
    fn clone_into_applies_overrides_and_links_parent() {
        // Given
        let registry = Registry::new();
        registry
            .register_components(vec![ComponentDescriptor::new::<Health>(), ComponentDescriptor::new::<Position>()])
            .unwrap();
        let ctx = Context::new(None);
        let source = ctx.create(CreateOpts::default()).unwrap();
        ctx.assign(
            source.clone(),
            vec![ComponentValue::of(&Health { current: 100, maximum: 100 }), ComponentValue::of(&Position { x: 1, y: 1 })],
        )
        .unwrap();

        let mut overrides = HashMap::new();
        let mut health_override = PropMap::new();
        health_override.insert("current".into(), json!(40));
        health_override.insert("maximum".into(), json!(100));
        overrides.insert("health".to_string(), health_override);

        // When
        let clone = registry.clone_into(&ctx, &ctx, &source, &overrides).unwrap();

        // Then
        assert!(clone.parent().unwrap().equal(&source));
        let health = ctx.get_raw(&clone, TypeId::of::<Health>()).unwrap();
        assert_eq!(health.downcast::<Health>().unwrap(), Health { current: 40, maximum: 100 });
        let position = ctx.get_raw(&clone, TypeId::of::<Position>()).unwrap();
        assert_eq!(position.downcast::<Position>().unwrap(), Position { x: 1, y: 1 });
    }

    #[test]
    fn clone_into_rejects_unknown_override_alias() {
        let registry = Registry::new();
        registry.register_components(vec![ComponentDescriptor::new::<Health>()]).unwrap();
        let ctx = Context::new(None);
        let source = ctx.create(CreateOpts::default()).unwrap();
        ctx.emplace(source.clone(), ComponentValue::of(&Health { current: 1, maximum: 1 })).unwrap();

        let mut overrides = HashMap::new();
        overrides.insert("ghost".to_string(), PropMap::new());

        let err = registry.clone_into(&ctx, &ctx, &source, &overrides).unwrap_err();
        assert_eq!(err, ManagerError::Registry(RegistryError::UnknownAlias("ghost".to_string())));
    }

    #[test]
    fn reset_clears_catalogue_and_prefabs() {
        let registry = registry_with_ping_pong();
        registry.register_prefab(PrefabAttrs::new("Thing")).unwrap();

        registry.reset();

        assert!(registry.type_for_alias("ping").is_none());
        assert!(registry.handlers_for("check").is_empty());
        assert!(!registry.prefabs().exists("Thing"));
    }
}
