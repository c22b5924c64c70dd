//! `tapestry`: an event-driven entity-component-system runtime.
//!
//! Entities are opaque identifiers; components are plain data attached one
//! per type; behaviour is expressed by sending named events to entities,
//! routed to whichever attached component types declared themselves as
//! handlers. There is no ticking "systems" scheduler — game logic here is
//! pure event reaction.
//!
//! The three load-bearing pieces are [`context`] (the storage core),
//! [`registry`] (the component/prefab/handler catalogue), and [`pipeline`]
//! (the Herald → Envoy → Scribe dispatch chain); [`world`] binds one of
//! each together behind a single façade.

extern crate self as tapestry;

pub mod bloom;
pub mod component;
pub mod context;
pub mod entity;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod prefab;
pub mod registry;
pub mod task;
pub mod world;

#[cfg(feature = "derive")]
pub use tapestry_macros::Component;

pub use component::{Component, Handler, Hooked};
pub use context::Context;
pub use entity::Entity;
pub use event::Event;
pub use registry::Registry;
pub use world::{ListFormat, Listing, Overrides, World, WorldOptions};
