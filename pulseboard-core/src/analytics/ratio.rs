//! DAU/MAU stickiness ratio.

use crate::error::Result;
use crate::types::{CountrySelection, Granularity, UsageTable};
use serde::Serialize;
use std::collections::BTreeMap;

/// Monthly stickiness of one country.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioRecord {
    /// `YYYY-MM`
    pub year_month: String,
    pub country: String,
    /// Mean daily active users over the month's daily rows
    pub avg_dau: f64,
    /// Monthly active users
    pub mau: u64,
    /// `avg_dau / mau`
    pub dau_mau_ratio: f64,
    /// Set when the ratio exceeds 1, which the source data should not allow
    pub out_of_range: bool,
}

/// Compute the DAU/MAU ratio per `(month, country)`.
///
/// Daily rows are averaged per month, monthly rows are summed per month,
/// and the two sides are inner-joined. Months with `mau == 0` are dropped.
/// Output is sorted by `(year_month, country)`.
pub fn dau_mau_ratio(
    daily: &UsageTable,
    monthly: &UsageTable,
    countries: &CountrySelection,
) -> Result<Vec<RatioRecord>> {
    Granularity::Daily.ensure(daily.granularity)?;
    Granularity::Monthly.ensure(monthly.granularity)?;

    // (month, country) -> (sum, days)
    let mut dau: BTreeMap<(&str, &str), (u64, u64)> = BTreeMap::new();
    for row in daily.rows.iter().filter(|r| countries.includes(&r.country)) {
        let Some(month) = row.date.get(..7) else {
            continue;
        };
        let entry = dau.entry((month, row.country.as_str())).or_default();
        entry.0 = entry.0.saturating_add(row.active_count);
        entry.1 += 1;
    }

    let mut mau: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for row in monthly.rows.iter().filter(|r| countries.includes(&r.country)) {
        let sum = mau.entry((row.date.as_str(), row.country.as_str())).or_default();
        *sum = sum.saturating_add(row.active_count);
    }

    let mut records = Vec::new();
    for ((month, country), (sum, days)) in dau {
        let Some(&monthly_active) = mau.get(&(month, country)) else {
            continue;
        };
        if monthly_active == 0 {
            tracing::warn!(month, country, "Dropping DAU/MAU ratio with zero MAU");
            continue;
        }

        let avg_dau = sum as f64 / days as f64;
        let ratio = avg_dau / monthly_active as f64;
        let out_of_range = ratio > 1.0;
        if out_of_range {
            tracing::warn!(
                month,
                country,
                avg_dau,
                mau = monthly_active,
                ratio,
                "DAU/MAU ratio above 1"
            );
        }

        records.push(RatioRecord {
            year_month: month.to_string(),
            country: country.to_string(),
            avg_dau,
            mau: monthly_active,
            dau_mau_ratio: ratio,
            out_of_range,
        });
    }

    Ok(records)
}
