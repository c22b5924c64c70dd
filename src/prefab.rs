//! Prefab templates: single-inheritance component lists resolved once at
//! registration time and materialised later via the clone algorithm (spec
//! §4.5).

use std::collections::HashMap;

use crate::component::PropMap;

/// The declaration accepted by [`crate::registry::Registry::register_prefab`].
#[derive(Debug, Clone)]
pub struct PrefabAttrs {
    pub name: String,
    /// Single-level parent names. Deeper inheritance falls out naturally
    /// because a parent prefab's own component list is already the
    /// flattened result of *its* `extends` list.
    pub extends: Vec<String>,
    /// Declared components, keyed by their registered alias.
    pub components: HashMap<String, PropMap>,
}

impl PrefabAttrs {
    pub fn new(name: impl Into<String>) -> Self {
        PrefabAttrs {
            name: name.into(),
            extends: Vec::new(),
            components: HashMap::new(),
        }
    }

    pub fn extends(mut self, parents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extends = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with(mut self, alias: impl Into<String>, props: PropMap) -> Self {
        self.components.insert(alias.into(), props);
        self
    }
}

/// One-level property merge: every key in `over` replaces the matching key
/// in `base`; whole values replace, they are never recursively merged
/// (spec §4.5 step 4).
pub(crate) fn merge_one_level(base: &PropMap, over: &PropMap) -> PropMap {
    let mut merged = base.clone();
    for (key, value) in over.iter() {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
