//! Transactional datastore contract for the authkestra authentication core.
//!
//! Every mutating operation runs inside one [`AuthTransaction`] scoped to a
//! single request; `MemoryStore` is the in-process reference implementation
//! used by tests and small deployments, `sql::SqlStore` (behind the
//! `postgres` feature) is the production backend.

pub mod entity;
pub mod error;
pub mod memory;
pub mod transaction;

#[cfg(feature = "store-sqlx")]
pub mod sql;

pub use entity::*;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use transaction::{
    AccountPatch, AuthStore, AuthTransaction, NewAccount, NewRefreshToken, NewSession,
    NewUser, NewVerificationCode, NewVerifier, UserPatch,
};

#[cfg(feature = "store-sqlx")]
pub use sql::SqlStore;
