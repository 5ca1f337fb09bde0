//! Derived metrics for the dashboard
//!
//! Every calculator is a pure function from tables to a new table; the ones
//! that need raw aggregates take a [`crate::db::DocumentStore`]. Empty input
//! always yields an empty result of the right shape.
//!
//! - [`ratio`]: DAU/MAU stickiness per month and country
//! - [`share`]: country shares with an "Others" bucket
//! - [`series`]: general and per-country chart series
//! - [`summary`]: lifetime totals computed at bootstrap
//! - [`free_tier`]: free users, heavy users and cycle consumption
//! - [`errors`]: error kinds over time
//! - [`features`]: daily feature activity

pub mod errors;
pub mod features;
pub mod free_tier;
pub mod ratio;
pub mod series;
pub mod share;
pub mod summary;

pub use errors::{error_series, invalid_format_types, ErrorSeries, ErrorSeriesRow, InvalidFormatCount};
pub use features::{feature_activity, Feature, FeatureActivityRecord};
pub use free_tier::{
    add_total_as_country, cycle_country_options, cycle_usage, filter_user_cycles, free_users,
    users_by_country_and_cycles, with_shares, CountryCyclesRecord, CycleUsageRecord,
    FreeUsersRecord,
};
pub use ratio::{dau_mau_ratio, RatioRecord};
pub use series::{
    country_series, general_series, top_countries, GeneralSeriesRecord, SeriesMetric, SeriesPoint,
};
pub use share::{country_share, ShareRecord};
pub use summary::{FormattedTotalMetrics, TotalMetrics};
