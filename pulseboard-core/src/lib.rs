//! # pulseboard-core
//!
//! Aggregation and caching layer of the pulseboard usage dashboard.
//!
//! This library provides:
//! - A read-only document store abstraction with a SQLite implementation
//! - Normalization of per-country activity documents into canonical tables
//! - Joins with new-user counts and synthesized "Total" rows
//! - Derived metrics: DAU/MAU ratio, country shares, lifetime summaries,
//!   free-tier classification, error and feature series
//! - Memoization of query results per filter combination
//! - Configuration management and logging infrastructure
//!
//! ## Data flow
//!
//! raw documents → [`usage::normalize`] → [`usage::join_new_users`] →
//! cached table → [`usage::add_total_rows`] / [`analytics`] → chart tables
//!
//! ## Example
//!
//! ```rust,no_run
//! use pulseboard_core::{Config, Dashboard, Database, DateRange, Granularity};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&config.store.database_path())
//!     .expect("failed to open database")
//!     .with_query_timeout(config.store.query_timeout());
//! db.migrate().expect("failed to run migrations");
//!
//! let today = chrono::Local::now().date_naive();
//! let dashboard = Dashboard::bootstrap(db, &config, today).expect("bootstrap failed");
//!
//! let range = DateRange::parse("2025-01-01", "2025-01-31").expect("valid range");
//! let table = dashboard.chart_data(Granularity::Daily, &range).expect("query failed");
//! println!("{} rows", table.len());
//! ```

// Re-export commonly used items at the crate root
pub use cache::{CacheKey, CacheStats, QueryCache};
pub use config::Config;
pub use dashboard::{CountryOptions, CycleUsage, Dashboard, DashboardCacheStats};
pub use db::{Database, DocumentStore};
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod analytics;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod types;
pub mod usage;
