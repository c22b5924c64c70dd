//! Component capability contract and the type-erased value that the storage
//! core actually keeps.
//!
//! Components are plain data: each component type is a distinct nominal
//! Rust type, but the *storage core* (`Context`) never touches the typed
//! value directly. It stores a [`ComponentValue`] — an alias, a `TypeId`,
//! and a `serde_json` property map — so that the map-shaped queries in
//! `context::query` (`match`, `at_least`, `between`, ...) can read arbitrary
//! keys without generic parameters. Typed access goes through
//! [`Component::new`]/[`Component::to_props`] at the edges (`World`,
//! `Context::get`).
//!
//! The component property DSL and its compile-time validation of property
//! types/min/max/regex/enumerated values are out of scope here (§1); `new`/
//! `cast` only do the structural (de)serialization a type needs to round
//! trip through a property map.

use std::any::TypeId;

use serde::{de::DeserializeOwned, Serialize};

use crate::bloom::Mask;
use crate::entity::Entity;
use crate::error::ShapeError;
use crate::event::{Event, Outcome};

mod descriptor;

pub use descriptor::{ComponentDescriptor, Hook};

/// A property map: the map-of-plain-values shape every component reduces to
/// for storage and for the property-based query family.
pub type PropMap = serde_json::Map<String, serde_json::Value>;

/// The capability contract an external component definition must satisfy
/// (spec §6), minus the optional `handle_event`/`on_hook` hooks, which live
/// on the separate [`Handler`]/[`Hooked`] traits so a component that doesn't
/// need them doesn't have to provide no-op implementations.
///
/// `#[derive(Component)]` (from `tapestry_macros`) implements `alias`/
/// `events` for you from the type name and an optional `#[component(...)]`
/// attribute; `new`/`to_props` are provided here via `serde_json` as long as
/// the type also derives `Serialize`/`Deserialize`.
pub trait Component: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable alias used as the external key for overrides, prefab
    /// declarations, and the registry's component catalogue.
    fn alias() -> &'static str
    where
        Self: Sized;

    /// The finite list of event names this component type handles. Bloom
    /// identity is tied to `(alias, events)`, so changing this list changes
    /// which archetype buckets this component's entities fall into.
    fn events() -> &'static [&'static str]
    where
        Self: Sized;

    /// Normalise raw properties before construction. The default is the
    /// identity transform; override for types that need to coerce input
    /// (e.g. accepting either an int or a float for a numeric field).
    fn cast(props: &PropMap) -> Result<PropMap, ShapeError>
    where
        Self: Sized,
    {
        Ok(props.clone())
    }

    /// Construct a value from a (already-cast) property map.
    fn new(props: PropMap) -> Result<Self, ShapeError>
    where
        Self: Sized,
    {
        serde_json::from_value(serde_json::Value::Object(props))
            .map_err(|e| ShapeError::invalid_properties(Self::alias(), e.to_string()))
    }

    /// Flatten this value back into a property map.
    fn to_props(&self) -> PropMap {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => PropMap::new(),
        }
    }
}

/// Implemented by component types that declare a `handle_event` function
/// (spec §6, optional). The registry only wires a type into the
/// event-handler lookup (§4.4) when it is registered through
/// [`ComponentDescriptor::with_handler`], which requires this bound.
pub trait Handler: Component {
    /// Handle `event`, named `name`. Returns whether to continue the
    /// dispatch chain and the (possibly `args`-mutated) event.
    fn handle_event(name: &str, event: Event) -> (Outcome, Event);
}

/// Implemented by component types that declare an `on_hook` function (spec
/// §6, optional), called out-of-band after a successful `attach`/`update`/
/// `remove` mutation of that type on an entity. Hooks never see a borrow of
/// the `Context`'s tables (they fire after the writer has already
/// committed), so they cannot re-enter the writer synchronously.
pub trait Hooked: Component {
    fn on_hook(hook: Hook, entity: &Entity, component: &Self);
}

/// The type-erased record the storage core keeps per `(entity, component
/// type)` pair: everything `Context` needs without being generic over `C`.
///
/// `events` rides along so the storage core can fold this value's bloom
/// term (`Mask::term(alias, events)`, spec §4.2) into an entity's archetype
/// mask on `emplace`/`erase` without reaching back into the component
/// registry — the core only ever needs what's already in hand.
#[derive(Clone, Debug)]
pub struct ComponentValue {
    pub type_id: TypeId,
    pub alias: &'static str,
    pub events: &'static [&'static str],
    pub props: PropMap,
}

impl ComponentValue {
    pub fn of<C: Component>(value: &C) -> Self {
        ComponentValue {
            type_id: TypeId::of::<C>(),
            alias: C::alias(),
            events: C::events(),
            props: value.to_props(),
        }
    }

    pub fn from_props<C: Component>(props: PropMap) -> Self {
        ComponentValue {
            type_id: TypeId::of::<C>(),
            alias: C::alias(),
            events: C::events(),
            props,
        }
    }

    /// Reconstruct the typed value. Fails only if the stored props no
    /// longer match `C`'s shape (e.g. after an `assign` built from
    /// mismatched overrides upstream).
    pub fn downcast<C: Component>(&self) -> Result<C, ShapeError> {
        debug_assert_eq!(self.type_id, TypeId::of::<C>());
        C::new(self.props.clone())
    }

    /// This value's contribution to an archetype's bloom mask (spec §4.2:
    /// the hashed term is the registered `(name, events)` contract, not the
    /// property payload).
    pub fn bloom_term(&self) -> Mask {
        Mask::term(self.alias, self.events)
    }
}
