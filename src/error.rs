//! Error taxonomy for the storage core and registry.
//!
//! Mirrors the four-way split from the design: not-found and conflict kinds
//! are ordinary, returned-to-caller outcomes ([`StoreError`],
//! [`RegistryError`]); shape and invariant-violation kinds
//! ([`ShapeError`], [`Fault`]) indicate a caller or system bug and abort the
//! current operation rather than being handled-and-continued.

use thiserror::Error;

/// Errors returned by [`crate::context::Context`] operations. These are
/// normal, expected outcomes a caller is meant to match on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entity not found")]
    EntityNotFound,
    #[error("component not found")]
    ComponentNotFound,
    #[error("name already registered")]
    NameAlreadyRegistered,
    #[error("already inserted")]
    AlreadyInserted,
}

/// Errors returned by [`crate::registry::Registry`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("already registered")]
    AlreadyRegistered,
    #[error("unknown component alias: {0}")]
    UnknownAlias(String),
    #[error("unknown prefab parent: {0}")]
    UnknownParent(String),
    #[error("unknown prefab: {0}")]
    UnknownPrefab(String),
}

/// Caller-bug errors: malformed input that aborts the current operation but
/// does not indicate storage corruption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("unknown component alias in overrides: {0}")]
    UnknownAlias(String),
    #[error("metadata must be a JSON object")]
    NonMapMetadata,
    #[error("query range is empty: lo must be <= hi")]
    EmptyRange,
    #[error("query properties must be non-empty")]
    EmptyProperties,
    #[error("invalid properties for component `{alias}`: {reason}")]
    InvalidProperties { alias: &'static str, reason: String },
}

impl ShapeError {
    pub fn invalid_properties(alias: &'static str, reason: impl Into<String>) -> Self {
        ShapeError::InvalidProperties {
            alias,
            reason: reason.into(),
        }
    }
}

/// Errors from Registry operations that compose the storage core with the
/// component catalogue — the clone algorithm (§4.4) and prefab resolution
/// (§4.5) — which can fail in any of the three ways their sub-steps can:
/// the source/parent entity is gone, an override or component declaration
/// names an alias the Registry doesn't know, or the merged properties don't
/// cast into the target component type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// System-bug errors: invariant violations. These are still returned as
/// `Result`s rather than panics, so a caller at the boundary can choose how
/// to react, but every call site in this crate treats them as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("event drifted during processing in handler for `{component}`")]
    EventDrifted { component: &'static str },
    #[error("handler for `{component}` returned a malformed response")]
    MalformedHandlerResponse { component: &'static str },
    #[error("component type not registered for event `{event}`")]
    UnregisteredComponent { event: String },
    #[error("flush timed out after {waited_ms}ms with work still in flight")]
    FlushTimedOut { waited_ms: u128 },
}
