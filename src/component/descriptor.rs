//! Type-erased descriptors for registered component types.
//!
//! A [`ComponentDescriptor`] is the registry's vtable for one component
//! type `C`: function pointers monomorphized over `C` at registration time,
//! stored behind `TypeId` so the registry and the dispatch pipeline can work
//! with heterogeneous component types without generics leaking into their
//! own signatures — a handful of fn pointers rather than a boxed trait
//! object, since the data itself already lives in `ComponentValue`'s
//! property map.

use std::any::TypeId;

use crate::component::{Component, ComponentValue, Handler, Hooked, PropMap};
use crate::entity::Entity;
use crate::error::ShapeError;
use crate::event::{Event, Outcome};

/// Which lifecycle point an `on_hook` callback fired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Attached,
    Updated,
    Removed,
}

type CastFn = fn(&PropMap) -> Result<PropMap, ShapeError>;
type ConstructFn = fn(PropMap) -> Result<ComponentValue, ShapeError>;
type HandleEventFn = fn(&str, Event) -> (Outcome, Event);
type OnHookFn = fn(Hook, &Entity, &ComponentValue);

/// The registry's vtable entry for one component type.
#[derive(Clone)]
pub struct ComponentDescriptor {
    pub(crate) type_id: TypeId,
    pub(crate) alias: &'static str,
    pub(crate) events: &'static [&'static str],
    cast: CastFn,
    construct: ConstructFn,
    handle_event: Option<HandleEventFn>,
    on_hook: Option<OnHookFn>,
}

impl ComponentDescriptor {
    /// Describe a plain component with no `handle_event`/`on_hook`.
    pub fn new<C: Component>() -> Self {
        ComponentDescriptor {
            type_id: TypeId::of::<C>(),
            alias: C::alias(),
            events: C::events(),
            cast: cast_impl::<C>,
            construct: construct_impl::<C>,
            handle_event: None,
            on_hook: None,
        }
    }

    /// Describe a component that also declares `handle_event`.
    pub fn with_handler<C: Handler>() -> Self {
        let mut descriptor = Self::new::<C>();
        descriptor.handle_event = Some(handle_event_impl::<C>);
        descriptor
    }

    /// Describe a component that also declares `on_hook`.
    pub fn with_hook<C: Hooked>() -> Self {
        let mut descriptor = Self::new::<C>();
        descriptor.on_hook = Some(on_hook_impl::<C>);
        descriptor
    }

    /// Describe a component that declares both `handle_event` and
    /// `on_hook`.
    pub fn with_handler_and_hook<C: Handler + Hooked>() -> Self {
        let mut descriptor = Self::new::<C>();
        descriptor.handle_event = Some(handle_event_impl::<C>);
        descriptor.on_hook = Some(on_hook_impl::<C>);
        descriptor
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn alias(&self) -> &'static str {
        self.alias
    }

    #[inline]
    pub fn events(&self) -> &'static [&'static str] {
        self.events
    }

    pub fn cast(&self, props: &PropMap) -> Result<PropMap, ShapeError> {
        (self.cast)(props)
    }

    pub fn construct(&self, props: PropMap) -> Result<ComponentValue, ShapeError> {
        (self.construct)(props)
    }

    pub fn has_handler(&self) -> bool {
        self.handle_event.is_some()
    }

    /// Invoke the type's `handle_event`, defaulting to `(Continue, event)`
    /// when the type declares no handler (spec §4.7 step 3).
    pub fn handle_event(&self, name: &str, event: Event) -> (Outcome, Event) {
        match self.handle_event {
            Some(f) => f(name, event),
            None => (Outcome::Continue, event),
        }
    }

    /// Fire the type's `on_hook`, if any, after a successful mutation.
    pub fn on_hook(&self, hook: Hook, entity: &Entity, value: &ComponentValue) {
        if let Some(f) = self.on_hook {
            f(hook, entity, value);
        }
    }
}

fn cast_impl<C: Component>(props: &PropMap) -> Result<PropMap, ShapeError> {
    C::cast(props)
}

fn construct_impl<C: Component>(props: PropMap) -> Result<ComponentValue, ShapeError> {
    let cast = C::cast(&props)?;
    let value = C::new(cast.clone())?;
    let _ = &value; // ensure construction succeeds before keeping the cast props
    Ok(ComponentValue::from_props::<C>(cast))
}

fn handle_event_impl<C: Handler>(name: &str, event: Event) -> (Outcome, Event) {
    C::handle_event(name, event)
}

fn on_hook_impl<C: Hooked>(hook: Hook, entity: &Entity, value: &ComponentValue) {
    match C::new(value.props.clone()) {
        Ok(typed) => C::on_hook(hook, entity, &typed),
        Err(_) => {
            log::warn!(
                "skipping on_hook for `{}`: stored properties no longer match the type",
                C::alias()
            );
        }
    }
}
