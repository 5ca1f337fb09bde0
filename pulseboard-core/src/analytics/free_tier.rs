//! Free-tier users and their cycle consumption.
//!
//! A free user is "heavy" once `cycles_consumed >= max_cycles`, where the
//! threshold is stored on each user's own record.

use crate::db::{Document, DocumentStore, Pipeline};
use crate::error::Result;
use crate::format::percentage;
use crate::types::{CountrySelection, FreeUserSegment, TOTAL_COUNTRY};
use crate::usage::normalize::read_count;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Distinct free users of a country and their share of the segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreeUsersRecord {
    pub country: String,
    pub users: u64,
    /// Percentage of the segment's users, rounded to 2 decimals
    pub share: f64,
}

/// Users of a country grouped by cycles consumed and year of last activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleUsageRecord {
    pub country: String,
    pub cycles_consumed: u64,
    /// Year of the user's last activity
    pub last_date: i32,
    pub user_count: u64,
}

/// Users of a country grouped by cycles consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryCyclesRecord {
    pub country: String,
    pub cycles_consumed: u64,
    pub users: u64,
}

/// Distinct free users per country for a segment, sorted by country.
pub fn free_users<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    segment: FreeUserSegment,
) -> Result<Vec<FreeUsersRecord>> {
    let pipeline = Pipeline::DistinctUsersByCountry {
        heavy_only: segment == FreeUserSegment::Heavy,
    };
    let counts: Vec<(String, u64)> = store
        .aggregate(collection, &pipeline)?
        .iter()
        .filter_map(|doc| {
            parse_row(collection, doc, |doc| {
                Ok((country_of(doc)?, read_count(doc, "users", true)?))
            })
        })
        .collect();

    Ok(with_shares(counts))
}

/// Attach each country's percentage of the summed users.
pub fn with_shares(counts: Vec<(String, u64)>) -> Vec<FreeUsersRecord> {
    let total: u64 = counts.iter().map(|(_, users)| users).sum();
    counts
        .into_iter()
        .map(|(country, users)| FreeUsersRecord {
            share: percentage(users as f64, total as f64),
            country,
            users,
        })
        .collect()
}

/// Users per `(country, cycles_consumed, year)`.
pub fn cycle_usage<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
) -> Result<Vec<CycleUsageRecord>> {
    Ok(store
        .aggregate(collection, &Pipeline::UsersByCyclesCountryYear)?
        .iter()
        .filter_map(|doc| {
            parse_row(collection, doc, |doc| {
                let year = doc
                    .get("last_date")
                    .and_then(Value::as_i64)
                    .and_then(|y| i32::try_from(y).ok())
                    .ok_or_else(|| "missing last_date year".to_string())?;
                Ok(CycleUsageRecord {
                    country: country_of(doc)?,
                    cycles_consumed: read_count(doc, "cycles_consumed", true)?,
                    last_date: year,
                    user_count: read_count(doc, "users", true)?,
                })
            })
        })
        .collect())
}

/// Users per `(country, cycles_consumed)`.
pub fn users_by_country_and_cycles<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
) -> Result<Vec<CountryCyclesRecord>> {
    Ok(store
        .aggregate(collection, &Pipeline::UsersByCountryAndCycles)?
        .iter()
        .filter_map(|doc| {
            parse_row(collection, doc, |doc| {
                Ok(CountryCyclesRecord {
                    country: country_of(doc)?,
                    cycles_consumed: read_count(doc, "cycles_consumed", true)?,
                    users: read_count(doc, "users", true)?,
                })
            })
        })
        .collect())
}

/// Append a "Total" pseudo-country per `(cycles_consumed, year)`.
pub fn add_total_as_country(records: &[CycleUsageRecord]) -> Vec<CycleUsageRecord> {
    let mut totals: BTreeMap<(u64, i32), u64> = BTreeMap::new();
    for record in records.iter().filter(|r| r.country != TOTAL_COUNTRY) {
        *totals
            .entry((record.cycles_consumed, record.last_date))
            .or_default() += record.user_count;
    }

    let mut out = records.to_vec();
    out.extend(
        totals
            .into_iter()
            .map(|((cycles_consumed, last_date), user_count)| CycleUsageRecord {
                country: TOTAL_COUNTRY.to_string(),
                cycles_consumed,
                last_date,
                user_count,
            }),
    );
    out
}

/// Keep the selected countries whose year lies in `years` (inclusive).
pub fn filter_user_cycles(
    records: &[CycleUsageRecord],
    countries: &CountrySelection,
    years: (i32, i32),
) -> Vec<CycleUsageRecord> {
    let (from, to) = years;
    records
        .iter()
        .filter(|r| countries.includes(&r.country) && (from..=to).contains(&r.last_date))
        .cloned()
        .collect()
}

/// Sorted country names with "Total" last.
pub fn cycle_country_options(records: &[CycleUsageRecord]) -> Vec<String> {
    let mut countries: Vec<String> = records
        .iter()
        .filter(|r| r.country != TOTAL_COUNTRY)
        .map(|r| r.country.clone())
        .collect();
    countries.sort();
    countries.dedup();
    if records.iter().any(|r| r.country == TOTAL_COUNTRY) {
        countries.push(TOTAL_COUNTRY.to_string());
    }
    countries
}

fn country_of(doc: &Document) -> std::result::Result<String, String> {
    match doc.get("country") {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err("missing country".to_string()),
    }
}

/// Parse one aggregate row, logging and dropping it on failure.
fn parse_row<T>(
    collection: &str,
    doc: &Document,
    parse: impl FnOnce(&Document) -> std::result::Result<T, String>,
) -> Option<T> {
    match parse(doc) {
        Ok(row) => Some(row),
        Err(reason) => {
            tracing::warn!(collection, %reason, "Skipping malformed aggregate row");
            None
        }
    }
}
