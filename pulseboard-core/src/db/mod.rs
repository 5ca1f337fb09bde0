//! Database layer for pulseboard
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The read-only [`DocumentStore`] query surface
//! - A repository implementing it over JSON documents

pub mod query;
pub mod repo;
pub mod schema;

pub use query::{Condition, Document, DocumentStore, Filter, Pipeline, Projection};
pub use repo::{Database, DEFAULT_QUERY_TIMEOUT};
