//! subroute Storage - Key-value store abstraction
//!
//! This crate provides the key-value lookup the router reads stored
//! configuration from, with in-memory and SQLite backends.

pub mod db;
pub mod models;
pub mod repository;
pub mod store;

pub use db::DatabasePool;
pub use models::Entry;
pub use repository::*;
pub use store::{create_store, KvStore, MemoryStore};
