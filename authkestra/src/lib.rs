//! # Authkestra
//!
//! A modular authentication framework: a provider-agnostic core
//! ([`authkestra_core`]), a concrete sign-in orchestrator
//! ([`authkestra_flow`], behind the `flow` feature), JWT minting
//! ([`authkestra_token`], behind `token`), HTTP adapters for Axum and
//! Actix-web, and first-party OAuth providers for GitHub, Google and
//! Discord.
//!
//! Enable only what you need:
//!
//! ```toml
//! [dependencies]
//! authkestra = { version = "0.1", features = ["flow", "axum", "github"] }
//! ```

#![warn(missing_docs)]

pub use authkestra_core::*;
pub use authkestra_store::{AuthStore, AuthTransaction, StoreError};

#[cfg(feature = "flow")]
pub use authkestra_flow::{Authkestra, SignInParams, SignInResult};

#[cfg(feature = "token")]
pub use authkestra_token::TokenManager;

#[cfg(feature = "axum")]
pub use authkestra_axum as axum;

#[cfg(feature = "actix")]
pub use authkestra_actix as actix;

#[cfg(feature = "github")]
pub use authkestra_providers_github::GithubProvider;

#[cfg(feature = "google")]
pub use authkestra_providers_google::GoogleProvider;

#[cfg(feature = "discord")]
pub use authkestra_providers_discord::DiscordProvider;
