//! Core domain types for pulseboard
//!
//! These types describe the canonical tabular model that every query in the
//! crate produces, plus the closed selector enums the UI layer dispatches on.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Granularity** | Daily or Monthly bucketing of a table |
//! | **Bucket** | Date key of a row: `YYYY-MM-DD` (daily) or `YYYY-MM` (monthly) |
//! | **Total** | Pseudo-country holding the per-bucket sum over real countries |
//! | **Others** | Pseudo-country collapsing every non-highlighted country in share views |
//! | **Heavy free user** | Free-tier user whose consumed cycles reach their own maximum |

use crate::error::{Error, Result};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Country value of synthesized total rows.
pub const TOTAL_COUNTRY: &str = "Total";

/// Country value collecting non-highlighted countries in share views.
pub const OTHERS_COUNTRY: &str = "Others";

// ============================================
// Granularity and date ranges
// ============================================

/// Bucketing of a usage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
        }
    }

    /// Label used by the dashboard ("Daily Active Users", ...).
    pub fn label(&self) -> &'static str {
        match self {
            Granularity::Daily => "Daily",
            Granularity::Monthly => "Monthly",
        }
    }

    /// Bucket key for a calendar day.
    pub fn bucket(&self, date: NaiveDate) -> String {
        match self {
            Granularity::Daily => date.format("%Y-%m-%d").to_string(),
            Granularity::Monthly => date.format("%Y-%m").to_string(),
        }
    }

    /// Normalize a raw date value into this granularity's bucket key.
    ///
    /// Accepts `YYYY-MM-DD` with an optional time suffix; monthly buckets
    /// additionally accept a bare `YYYY-MM`.
    pub fn normalize_bucket(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        match self {
            Granularity::Daily => parse_day(raw).map(|d| self.bucket(d)),
            Granularity::Monthly => {
                let month = raw.get(..7)?;
                NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
                    .ok()
                    .map(|d| self.bucket(d))
            }
        }
    }

    pub(crate) fn ensure(&self, actual: Granularity) -> Result<()> {
        if *self == actual {
            Ok(())
        } else {
            Err(Error::GranularityMismatch {
                expected: self.as_str(),
                actual: actual.as_str(),
            })
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Granularity::Daily),
            "monthly" => Ok(Granularity::Monthly),
            _ => Err(Error::InvalidSelector {
                kind: "view",
                value: s.to_string(),
            }),
        }
    }
}

/// Parse the leading `YYYY-MM-DD` of a date or timestamp string.
pub(crate) fn parse_day(raw: &str) -> Option<NaiveDate> {
    let day = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Inclusive calendar range selected in the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse ISO date strings as sent by the date pickers.
    ///
    /// Only the leading `YYYY-MM-DD` is read, so full timestamps are accepted.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start_date = parse_day(start).ok_or_else(|| Error::InvalidDate(start.to_string()))?;
        let end_date = parse_day(end).ok_or_else(|| Error::InvalidDate(end.to_string()))?;
        Self::new(start_date, end_date)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// First bucket covered by this range.
    pub fn first_bucket(&self, granularity: Granularity) -> String {
        granularity.bucket(self.start)
    }

    /// First bucket strictly after this range.
    pub fn bucket_after(&self, granularity: Granularity) -> String {
        match granularity {
            Granularity::Daily => granularity.bucket(self.end + chrono::Days::new(1)),
            Granularity::Monthly => {
                let month_start = NaiveDate::from_ymd_opt(self.end.year(), self.end.month(), 1)
                    .unwrap_or(self.end);
                granularity.bucket(month_start + Months::new(1))
            }
        }
    }

    /// Whether a normalized bucket key lies inside the range.
    pub fn contains_bucket(&self, granularity: Granularity, bucket: &str) -> bool {
        bucket >= self.first_bucket(granularity).as_str()
            && bucket <= granularity.bucket(self.end).as_str()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

// ============================================
// Canonical usage rows
// ============================================

/// One canonical row: activity of a country in a date bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Bucket key (`YYYY-MM-DD` or `YYYY-MM`)
    pub date: String,
    /// Country name, or [`TOTAL_COUNTRY`]
    pub country: String,
    /// Active users (DAU for daily buckets, MAU for monthly ones)
    pub active_count: u64,
    /// Users first seen in the bucket
    pub new_users: u64,
    /// Active users holding a subscription
    pub subscribed: u64,
    /// Interactions of any kind
    pub interactions: u64,
    /// Audio interactions
    pub audio: u64,
    /// Text interactions
    pub text: u64,
}

impl UsageRecord {
    /// An all-zero row for a bucket and country.
    pub fn empty(date: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            country: country.into(),
            active_count: 0,
            new_users: 0,
            subscribed: 0,
            interactions: 0,
            audio: 0,
            text: 0,
        }
    }

    /// Active users without a subscription.
    pub fn free(&self) -> u64 {
        self.active_count.saturating_sub(self.subscribed)
    }

    /// Add every numeric column of `other` into `self`.
    pub fn accumulate(&mut self, other: &UsageRecord) {
        self.active_count = self.active_count.saturating_add(other.active_count);
        self.new_users = self.new_users.saturating_add(other.new_users);
        self.subscribed = self.subscribed.saturating_add(other.subscribed);
        self.interactions = self.interactions.saturating_add(other.interactions);
        self.audio = self.audio.saturating_add(other.audio);
        self.text = self.text.saturating_add(other.text);
    }

    pub fn is_total(&self) -> bool {
        self.country == TOTAL_COUNTRY
    }

    /// Check the cross-column invariants the source does not enforce.
    pub fn validate(&self) -> Result<()> {
        if self.subscribed > self.active_count {
            return Err(Error::MalformedRecord {
                collection: String::new(),
                reason: format!(
                    "{} {}: subscribed {} exceeds active {}",
                    self.date, self.country, self.subscribed, self.active_count
                ),
            });
        }
        let within_interactions = self
            .audio
            .checked_add(self.text)
            .is_some_and(|sum| sum <= self.interactions);
        if !within_interactions {
            return Err(Error::MalformedRecord {
                collection: String::new(),
                reason: format!(
                    "{} {}: audio {} + text {} exceeds interactions {}",
                    self.date, self.country, self.audio, self.text, self.interactions
                ),
            });
        }
        Ok(())
    }
}

/// A usage table tagged with the granularity of its buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageTable {
    pub granularity: Granularity,
    pub rows: Vec<UsageRecord>,
}

impl UsageTable {
    pub fn empty(granularity: Granularity) -> Self {
        Self {
            granularity,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Distinct countries in first-seen order.
    pub fn countries(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.country.as_str()))
            .map(|r| r.country.clone())
            .collect()
    }

    /// Distinct bucket keys in first-seen order.
    pub fn dates(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.date.as_str()))
            .map(|r| r.date.clone())
            .collect()
    }
}

/// New-user count of a country in a bucket, from the new-users collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUsersRecord {
    pub date: String,
    pub country: String,
    pub new_users: u64,
}

/// New-user counts tagged with their bucket granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewUsersTable {
    pub granularity: Granularity,
    pub rows: Vec<NewUsersRecord>,
}

// ============================================
// Selectors
// ============================================

/// Countries chosen in a dropdown. An empty choice means every country.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub enum CountrySelection {
    #[default]
    All,
    /// Sorted, de-duplicated country names
    Only(Vec<String>),
}

impl CountrySelection {
    /// Build a selection; order of selection does not matter.
    pub fn from_list<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = countries
            .into_iter()
            .map(Into::into)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        list.sort();
        list.dedup();
        if list.is_empty() {
            CountrySelection::All
        } else {
            CountrySelection::Only(list)
        }
    }

    pub fn includes(&self, country: &str) -> bool {
        match self {
            CountrySelection::All => true,
            CountrySelection::Only(list) => list.binary_search_by(|c| c.as_str().cmp(country)).is_ok(),
        }
    }

    /// Stable textual form used inside cache keys.
    pub fn key_fragment(&self) -> String {
        match self {
            CountrySelection::All => "[]".to_string(),
            CountrySelection::Only(list) => format!("[{}]", list.join(",")),
        }
    }
}

/// Which population of active users a chart shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSelector {
    TotalActive,
    Free,
    Subscribed,
}

impl MetricSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricSelector::TotalActive => "total_active",
            MetricSelector::Free => "free",
            MetricSelector::Subscribed => "subscribed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetricSelector::TotalActive => "Total Active Users",
            MetricSelector::Free => "Free Users",
            MetricSelector::Subscribed => "Subscribed Users",
        }
    }

    /// Value of this metric in a row.
    pub fn value(&self, row: &UsageRecord) -> u64 {
        match self {
            MetricSelector::TotalActive => row.active_count,
            MetricSelector::Free => row.free(),
            MetricSelector::Subscribed => row.subscribed,
        }
    }
}

impl std::str::FromStr for MetricSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Total Active Users" | "total_active" | "total-active" => Ok(MetricSelector::TotalActive),
            "Free Users" | "free" => Ok(MetricSelector::Free),
            "Subscribed Users" | "subscribed" => Ok(MetricSelector::Subscribed),
            other => Err(Error::InvalidSelector {
                kind: "metric",
                value: other.to_string(),
            }),
        }
    }
}

/// Which interaction column a chart shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionSelector {
    Total,
    Audio,
    Text,
}

impl InteractionSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionSelector::Total => "total",
            InteractionSelector::Audio => "audio",
            InteractionSelector::Text => "text",
        }
    }

    pub fn value(&self, row: &UsageRecord) -> u64 {
        match self {
            InteractionSelector::Total => row.interactions,
            InteractionSelector::Audio => row.audio,
            InteractionSelector::Text => row.text,
        }
    }
}

impl std::str::FromStr for InteractionSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Total Interactions" | "total" => Ok(InteractionSelector::Total),
            "Audio" | "audio" => Ok(InteractionSelector::Audio),
            "Text" | "text" => Ok(InteractionSelector::Text),
            other => Err(Error::InvalidSelector {
                kind: "interaction",
                value: other.to_string(),
            }),
        }
    }
}

/// Denominator of a percentage-of-total share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMode {
    /// Share of the selected metric's own total for the date
    RelativeToCategory,
    /// Share of all active users for the date
    RelativeToTotal,
}

impl std::str::FromStr for ShareMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Relative to selected category total" | "category" => Ok(ShareMode::RelativeToCategory),
            "Relative to total" | "total" => Ok(ShareMode::RelativeToTotal),
            other => Err(Error::InvalidSelector {
                kind: "share mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Free-tier population shown in the free users views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeUserSegment {
    /// Every distinct free user
    Total,
    /// Users with `cycles_consumed >= max_cycles`
    Heavy,
}

impl std::str::FromStr for FreeUserSegment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Total Free Users" | "total" => Ok(FreeUserSegment::Total),
            "Heavy Free Users" | "heavy" => Ok(FreeUserSegment::Heavy),
            other => Err(Error::InvalidSelector {
                kind: "free user",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_date_range_rejects_reversed_bounds() {
        let err = DateRange::new(day("2025-02-01"), day("2025-01-01")).unwrap_err();
        assert!(matches!(err, Error::InvalidDateRange { .. }));
        assert!(DateRange::new(day("2025-01-01"), day("2025-01-01")).is_ok());
    }

    #[test]
    fn test_date_range_parse_accepts_timestamps() {
        let range = DateRange::parse("2025-01-01T00:00:00", "2025-01-31").unwrap();
        assert_eq!(range.start(), day("2025-01-01"));
        assert!(matches!(
            DateRange::parse("01/01/2025", "2025-01-31"),
            Err(Error::InvalidDate(_))
        ));
    }

    #[test]
    fn test_bucket_bounds() {
        let range = DateRange::parse("2024-12-15", "2025-01-31").unwrap();
        assert_eq!(range.bucket_after(Granularity::Daily), "2025-02-01");
        assert_eq!(range.bucket_after(Granularity::Monthly), "2025-02");
        assert!(range.contains_bucket(Granularity::Monthly, "2024-12"));
        assert!(!range.contains_bucket(Granularity::Daily, "2024-12-14"));
        assert!(range.contains_bucket(Granularity::Daily, "2025-01-31"));
    }

    #[test]
    fn test_normalize_bucket() {
        assert_eq!(
            Granularity::Daily.normalize_bucket("2025-01-05T13:00:00Z").as_deref(),
            Some("2025-01-05")
        );
        assert_eq!(
            Granularity::Monthly.normalize_bucket("2025-01").as_deref(),
            Some("2025-01")
        );
        assert_eq!(
            Granularity::Monthly.normalize_bucket("2025-01-01").as_deref(),
            Some("2025-01")
        );
        assert_eq!(Granularity::Daily.normalize_bucket("2025-01"), None);
        assert_eq!(Granularity::Monthly.normalize_bucket("garbage"), None);
    }

    #[test]
    fn test_country_selection_is_order_insensitive() {
        let a = CountrySelection::from_list(["BR", "AR"]);
        let b = CountrySelection::from_list(["AR", "BR", "AR"]);
        assert_eq!(a, b);
        assert_eq!(a.key_fragment(), "[AR,BR]");
        assert!(a.includes("AR"));
        assert!(!a.includes("CL"));
        assert_eq!(CountrySelection::from_list(Vec::<String>::new()), CountrySelection::All);
    }

    #[test]
    fn test_selectors_reject_unknown_labels() {
        assert_eq!(
            "Free Users".parse::<MetricSelector>().unwrap(),
            MetricSelector::Free
        );
        assert!(matches!(
            "Paying Users".parse::<MetricSelector>(),
            Err(Error::InvalidSelector { kind: "metric", .. })
        ));
        assert!("Relative to total".parse::<ShareMode>().is_ok());
        assert!("Heavy Free Users".parse::<FreeUserSegment>().is_ok());
        assert!("Video".parse::<InteractionSelector>().is_err());
        assert!("weekly".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_record_validation() {
        let mut row = UsageRecord::empty("2025-01-01", "AR");
        row.active_count = 10;
        row.subscribed = 4;
        row.interactions = 5;
        row.audio = 3;
        row.text = 2;
        assert!(row.validate().is_ok());
        assert_eq!(row.free(), 6);

        row.subscribed = 11;
        assert!(row.validate().is_err());
    }

    #[test]
    fn test_large_counts_do_not_overflow() {
        let mut row = UsageRecord::empty("2025-01-01", "AR");
        row.active_count = 1;
        row.interactions = 1;
        row.audio = u64::MAX;
        row.text = 1;
        assert!(row.validate().is_err());

        let mut total = UsageRecord::empty("2025-01-01", TOTAL_COUNTRY);
        let mut big = UsageRecord::empty("2025-01-01", "AR");
        big.active_count = u64::MAX;
        let mut small = UsageRecord::empty("2025-01-01", "BR");
        small.active_count = 1;
        total.accumulate(&big);
        total.accumulate(&small);
        assert_eq!(total.active_count, u64::MAX);
    }
}
