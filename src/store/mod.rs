//! Credential store: per-user OAuth tokens and tenants, held in process memory.
//!
//! Nothing is persisted: a restart loses every connection and the user has
//! to go through the consent flow again.

pub mod credentials;

pub use credentials::{Connection, CredentialEntry, CredentialStore, StoreSummary, DEFAULT_USER_ID};
