use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, LitStr};

/// Converts `PascalCase` into `snake_case`, used to derive a default alias
/// from the component type's name.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

struct ComponentAttrs {
    alias: Option<String>,
    events: Vec<String>,
}

fn parse_attrs(ast: &DeriveInput) -> ComponentAttrs {
    let mut attrs = ComponentAttrs {
        alias: None,
        events: Vec::new(),
    };

    for attr in &ast.attrs {
        if !attr.path().is_ident("component") {
            continue;
        }

        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("alias") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                attrs.alias = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("events") {
                meta.parse_nested_meta(|event_meta| {
                    if let Some(ident) = event_meta.path.get_ident() {
                        attrs.events.push(ident.to_string());
                    }
                    Ok(())
                })
            } else {
                Ok(())
            }
        });
    }

    attrs
}

pub fn derive_component(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let struct_name = &ast.ident;

    let attrs = parse_attrs(&ast);
    let alias = attrs
        .alias
        .unwrap_or_else(|| snake_case(&struct_name.to_string()));
    let events = attrs.events;

    // Use `::tapestry` which works both inside and outside the crate via the
    // `extern crate self as tapestry;` alias declared in lib.rs.
    TokenStream::from(quote! {
        impl ::tapestry::component::Component for #struct_name {
            fn alias() -> &'static str {
                #alias
            }

            fn events() -> &'static [&'static str] {
                &[#(#events),*]
            }
        }
    })
}
