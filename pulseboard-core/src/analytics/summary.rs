//! Lifetime summary metrics.
//!
//! Computed once when the process starts and handed to the dashboard as a
//! value; user-selected filters never change them.

use crate::config::CollectionsConfig;
use crate::db::DocumentStore;
use crate::error::Result;
use crate::format::format_number_smart;
use crate::types::{DateRange, Granularity, UsageTable};
use crate::usage::{fetch_activity, load_usage};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;

/// Lifetime totals and averages from a fixed anchor date to bootstrap day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotalMetrics {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total_new_users: u64,
    /// Summed DAU divided by the number of distinct days
    pub average_dau: u64,
    /// Summed MAU divided by the number of distinct months
    pub average_mau: u64,
    pub total_interactions: u64,
    pub total_audio: u64,
    pub total_text: u64,
}

/// [`TotalMetrics`] rendered for summary cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedTotalMetrics {
    pub total_new_users: String,
    pub average_dau: String,
    pub average_mau: String,
    pub total_interactions: String,
    pub total_audio: String,
    pub total_text: String,
}

impl TotalMetrics {
    /// Query the store for the lifetime range `start..=today`.
    pub fn compute<S: DocumentStore + ?Sized>(
        store: &S,
        collections: &CollectionsConfig,
        start: NaiveDate,
        today: NaiveDate,
    ) -> Result<Self> {
        let range = DateRange::new(start, today)?;
        tracing::info!(%range, "Computing lifetime metrics");

        let daily = load_usage(store, collections, Granularity::Daily, &range)?;
        let monthly = fetch_activity(store, collections, Granularity::Monthly, &range)?;
        let metrics = Self::from_tables(&range, &daily, &monthly);

        tracing::info!(
            total_new_users = metrics.total_new_users,
            average_dau = metrics.average_dau,
            average_mau = metrics.average_mau,
            "Lifetime metrics computed"
        );
        Ok(metrics)
    }

    /// Fold already-loaded daily and monthly tables without Total rows.
    pub fn from_tables(range: &DateRange, daily: &UsageTable, monthly: &UsageTable) -> Self {
        let real_daily = daily.rows.iter().filter(|r| !r.is_total());

        let mut metrics = TotalMetrics {
            start: range.start(),
            end: range.end(),
            total_new_users: 0,
            average_dau: 0,
            average_mau: 0,
            total_interactions: 0,
            total_audio: 0,
            total_text: 0,
        };

        let mut dau_sum = 0u64;
        let mut days = HashSet::new();
        for row in real_daily {
            metrics.total_new_users = metrics.total_new_users.saturating_add(row.new_users);
            metrics.total_interactions = metrics.total_interactions.saturating_add(row.interactions);
            metrics.total_audio = metrics.total_audio.saturating_add(row.audio);
            metrics.total_text = metrics.total_text.saturating_add(row.text);
            dau_sum = dau_sum.saturating_add(row.active_count);
            days.insert(row.date.as_str());
        }

        let mut mau_sum = 0u64;
        let mut months = HashSet::new();
        for row in monthly.rows.iter().filter(|r| !r.is_total()) {
            mau_sum = mau_sum.saturating_add(row.active_count);
            months.insert(row.date.as_str());
        }

        metrics.average_dau = average(dau_sum, days.len());
        metrics.average_mau = average(mau_sum, months.len());
        metrics
    }

    pub fn formatted(&self) -> FormattedTotalMetrics {
        let fmt = |v: u64| format_number_smart(v as f64);
        FormattedTotalMetrics {
            total_new_users: fmt(self.total_new_users),
            average_dau: fmt(self.average_dau),
            average_mau: fmt(self.average_mau),
            total_interactions: fmt(self.total_interactions),
            total_audio: fmt(self.total_audio),
            total_text: fmt(self.total_text),
        }
    }
}

/// Integer mean, 0 for no buckets.
fn average(sum: u64, buckets: usize) -> u64 {
    if buckets == 0 {
        0
    } else {
        sum / buckets as u64
    }
}
