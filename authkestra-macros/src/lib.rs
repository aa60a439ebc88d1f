//! # Authkestra Macros
//!
//! Eliminates the `FromRef` boilerplate an Axum handler needs to pull the
//! shared `Arc<Authkestra>` orchestrator out of application state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use authkestra_macros::AuthkestraFromRef;
//! use authkestra_flow::Authkestra;
//! use std::sync::Arc;
//!
//! #[derive(Clone, AuthkestraFromRef)]
//! struct AppState {
//!     #[authkestra]
//!     auth: Arc<Authkestra>,
//!     db_pool: Arc<PgPool>,
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// Derive macro generating `FromRef<YourState> for Arc<Authkestra>`.
///
/// Requires exactly one field marked `#[authkestra]`, of type
/// `Arc<Authkestra>`.
#[proc_macro_derive(AuthkestraFromRef, attributes(authkestra))]
pub fn derive_authkestra_from_ref(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let struct_name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let authkestra_field = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => fields.named.iter().find(|f| {
                f.attrs
                    .iter()
                    .any(|attr| attr.path().is_ident("authkestra"))
            }),
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "AuthkestraFromRef can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(
                &input,
                "AuthkestraFromRef can only be derived for structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let authkestra_field = match authkestra_field {
        Some(field) => field,
        None => {
            return syn::Error::new_spanned(
                &input,
                "No field marked with #[authkestra] found. Add #[authkestra] to your Arc<Authkestra> field."
            )
            .to_compile_error()
            .into();
        }
    };

    let field_name = authkestra_field.ident.as_ref().unwrap();
    let field_ty = &authkestra_field.ty;

    let expanded = quote! {
        impl #impl_generics axum::extract::FromRef<#struct_name #ty_generics> for #field_ty
        #where_clause
        {
            fn from_ref(state: &#struct_name #ty_generics) -> Self {
                state.#field_name.clone()
            }
        }
    };

    TokenStream::from(expanded)
}
