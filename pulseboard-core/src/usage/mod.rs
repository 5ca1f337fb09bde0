//! Usage tables: fetching, normalization, joining and totals
//!
//! The chart pipeline for a `(granularity, range)` pair is:
//!
//! 1. [`fetch_activity`] reads the daily or monthly activity collection and
//!    normalizes it ([`normalize`])
//! 2. [`fetch_new_users`] reads the new-users collection bucketed to the
//!    same granularity ([`normalize_new_users`])
//! 3. [`join_new_users`] left-joins the two
//!
//! [`load_usage`] runs all three. [`add_total_rows`] is applied by callers
//! that need the synthesized "Total" country.

pub mod join;
pub mod normalize;
pub mod totals;

pub use join::join_new_users;
pub use normalize::{count_field, date_field, normalize, normalize_new_users};
pub use totals::add_total_rows;

use crate::config::CollectionsConfig;
use crate::db::{DocumentStore, Filter, Projection};
use crate::error::Result;
use crate::types::{DateRange, Granularity, NewUsersTable, UsageTable};
use serde_json::Value;
use std::ops::Bound;

/// Filter selecting every bucket of `range` on a date-keyed field.
///
/// Dates are stored as ISO strings, so lexicographic bounds on the bucket
/// keys select both `YYYY-MM` and `YYYY-MM-DD[...]` values.
pub fn bucket_filter(field: &str, granularity: Granularity, range: &DateRange) -> Filter {
    Filter::new().range(
        field,
        Bound::Included(Value::String(range.first_bucket(granularity))),
        Bound::Excluded(Value::String(range.bucket_after(granularity))),
    )
}

/// Read and normalize the activity collection for `granularity`.
pub fn fetch_activity<S: DocumentStore + ?Sized>(
    store: &S,
    collections: &CollectionsConfig,
    granularity: Granularity,
    range: &DateRange,
) -> Result<UsageTable> {
    let collection = match granularity {
        Granularity::Daily => &collections.daily_activity,
        Granularity::Monthly => &collections.monthly_activity,
    };
    let projection = Projection::fields(&[
        date_field(granularity),
        "country",
        count_field(granularity),
        "subscribed",
        "interactions",
        "audio",
        "text",
    ]);

    let documents = store.find(
        collection,
        &bucket_filter(date_field(granularity), granularity, range),
        &projection,
    )?;
    Ok(normalize(documents, granularity, range))
}

/// Read new-user counts, bucketed to `granularity`.
pub fn fetch_new_users<S: DocumentStore + ?Sized>(
    store: &S,
    collections: &CollectionsConfig,
    granularity: Granularity,
    range: &DateRange,
) -> Result<NewUsersTable> {
    let documents = store.find(
        &collections.new_users,
        &bucket_filter("date", granularity, range),
        &Projection::fields(&["date", "country", "new_users"]),
    )?;
    Ok(normalize_new_users(documents, granularity, range))
}

/// Fetch activity and new users and join them.
pub fn load_usage<S: DocumentStore + ?Sized>(
    store: &S,
    collections: &CollectionsConfig,
    granularity: Granularity,
    range: &DateRange,
) -> Result<UsageTable> {
    let activity = fetch_activity(store, collections, granularity, range)?;
    let new_users = fetch_new_users(store, collections, granularity, range)?;
    join_new_users(&activity, &new_users)
}
