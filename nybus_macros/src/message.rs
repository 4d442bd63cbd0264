use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr};

pub enum Kind {
    Command,
    Event,
}

#[derive(Default)]
struct Overrides {
    namespace: Option<LitStr>,
    name: Option<LitStr>,
}

pub fn derive_message(input: TokenStream, kind: Kind) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);

    let overrides = match extract_overrides(&input) {
        Ok(overrides) => overrides,
        Err(err) => return err.to_compile_error().into(),
    };

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let name = match &overrides.name {
        Some(name) => quote! { #name },
        None => {
            let name = ident.to_string();
            quote! { #name }
        }
    };

    // Default namespace: the module the type is declared in.
    let namespace = match &overrides.namespace {
        Some(namespace) => quote! { #namespace },
        None => quote! { ::std::module_path!().replace("::", ".") },
    };

    let marker = match kind {
        Kind::Command => quote! { nybus::Command },
        Kind::Event => quote! { nybus::Event },
    };

    let expanded = quote! {
        impl #impl_generics nybus::Payload for #ident #ty_generics #where_clause {
            fn descriptor() -> nybus::MessageDescriptor {
                nybus::MessageDescriptor::new(#namespace, #name)
            }
        }

        impl #impl_generics #marker for #ident #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

fn extract_overrides(input: &DeriveInput) -> syn::Result<Overrides> {
    let mut overrides = Overrides::default();

    for attr in &input.attrs {
        if !attr.path().is_ident("message") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("namespace") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().contains(':') {
                    return Err(meta.error("message namespace must not contain ':'"));
                }
                overrides.namespace = Some(value);
                Ok(())
            } else if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                let text = value.value();
                if text.is_empty() {
                    return Err(meta.error("message name must not be empty"));
                }
                if text.contains(':') {
                    return Err(meta.error("message name must not contain ':'"));
                }
                overrides.name = Some(value);
                Ok(())
            } else {
                Err(meta.error("expected `namespace = \"...\"` or `name = \"...\"`"))
            }
        })?;
    }

    Ok(overrides)
}
