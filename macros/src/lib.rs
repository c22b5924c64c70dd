mod component;

use proc_macro::TokenStream;

/// Derives [`tapestry::component::Component`] for a struct, giving it a
/// default alias (the underscored last segment of the type name) and an
/// empty declared event list. Stack this with `#[derive(Serialize,
/// Deserialize)]` since `Component::new`/`to_props` round-trip through
/// `serde_json`.
///
/// Use `#[component(alias = "...")]` to override the default alias, and
/// `#[component(events(check, damage))]` to declare handled events.
#[proc_macro_derive(Component, attributes(component))]
pub fn derive_component(item: TokenStream) -> TokenStream {
    component::derive_component(item)
}
