//! Warden Grants - Object-level permission engine built on warden-core
//!
//! This crate provides the storage and query core for per-object
//! permissions:
//!
//! - The permission catalog grants are validated against
//! - Grant stores for users and groups (in-memory and SQLite)
//! - The assignment engine (assign/remove, single and bulk)
//! - The query engine (checks, object listings, inverse lookups)
//! - A cached per-principal checker and the `Guardian` service tying them
//!   together
//!
//! ## Architecture
//!
//! - **Model** (warden-core): Types, collaborator traits, errors, config
//! - **Engine** (this crate): Catalog, stores, assignment and query
//! - **Front end** (warden-cli): Command-line access to a configured store

pub mod assignment;
pub mod catalog;
pub mod checker;
pub mod directory;
pub mod guardian;
pub mod query;
pub mod resolver;
pub mod store;

pub use assignment::AssignmentEngine;
pub use catalog::{CatalogStore, PermissionCatalog};
pub use checker::ObjectPermissionChecker;
pub use directory::MemoryGroupDirectory;
pub use guardian::Guardian;
pub use query::{ObjectGrants, ObjectQuery, QueryEngine};
pub use resolver::MemoryObjectRegistry;
pub use store::{validate_grant, GrantFilter, GrantStore, GrantStores, MemoryGrantStore};
#[cfg(feature = "sqlite")]
pub use store::{SqliteBackend, SqliteGrantStore};
