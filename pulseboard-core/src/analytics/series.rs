//! Chart series derived from a usage table.

use crate::error::{Error, Result};
use crate::format::percentage;
use crate::types::{CountrySelection, InteractionSelector, MetricSelector, UsageRecord, UsageTable};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// All-country totals of a date bucket with derived percentages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralSeriesRecord {
    pub date: String,
    pub active_count: u64,
    pub new_users: u64,
    pub subscribed: u64,
    pub interactions: u64,
    pub audio: u64,
    pub text: u64,
    /// New users as a percentage of active users
    pub new_users_pct: f64,
    /// Subscribed users as a percentage of active users
    pub subscribed_pct: f64,
    /// Audio as a percentage of interactions
    pub audio_pct: f64,
    /// Text as a percentage of interactions
    pub text_pct: f64,
}

/// Per-date totals over the real countries, sorted by date.
pub fn general_series(table: &UsageTable) -> Vec<GeneralSeriesRecord> {
    let mut sums: BTreeMap<&str, UsageRecord> = BTreeMap::new();
    for row in table.rows.iter().filter(|r| !r.is_total()) {
        sums.entry(row.date.as_str())
            .or_insert_with(|| UsageRecord::empty(row.date.clone(), ""))
            .accumulate(row);
    }

    sums.into_values()
        .map(|s| GeneralSeriesRecord {
            new_users_pct: percentage(s.new_users as f64, s.active_count as f64),
            subscribed_pct: percentage(s.subscribed as f64, s.active_count as f64),
            audio_pct: percentage(s.audio as f64, s.interactions as f64),
            text_pct: percentage(s.text as f64, s.interactions as f64),
            date: s.date,
            active_count: s.active_count,
            new_users: s.new_users,
            subscribed: s.subscribed,
            interactions: s.interactions,
            audio: s.audio,
            text: s.text,
        })
        .collect()
}

/// Column plotted by a per-country chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "selector")]
pub enum SeriesMetric {
    Active(MetricSelector),
    NewUsers,
    Interactions(InteractionSelector),
}

impl SeriesMetric {
    pub fn value(&self, row: &UsageRecord) -> u64 {
        match self {
            SeriesMetric::Active(selector) => selector.value(row),
            SeriesMetric::NewUsers => row.new_users,
            SeriesMetric::Interactions(selector) => selector.value(row),
        }
    }

    /// Stable textual form used inside cache keys.
    pub fn key_fragment(&self) -> String {
        match self {
            SeriesMetric::Active(selector) => format!("active.{}", selector.as_str()),
            SeriesMetric::NewUsers => "new_users".to_string(),
            SeriesMetric::Interactions(selector) => format!("interactions.{}", selector.as_str()),
        }
    }
}

impl std::str::FromStr for SeriesMetric {
    type Err = Error;

    /// Accepts `active[:<metric>]`, `new_users` and `interactions[:<selector>]`.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, selector) = match s.trim().split_once(':') {
            Some((kind, selector)) => (kind, Some(selector)),
            None => (s.trim(), None),
        };
        match (kind, selector) {
            ("active", None) => Ok(SeriesMetric::Active(MetricSelector::TotalActive)),
            ("active", Some(sel)) => Ok(SeriesMetric::Active(sel.parse()?)),
            ("new_users" | "new-users", None) => Ok(SeriesMetric::NewUsers),
            ("interactions", None) => Ok(SeriesMetric::Interactions(InteractionSelector::Total)),
            ("interactions", Some(sel)) => Ok(SeriesMetric::Interactions(sel.parse()?)),
            _ => Err(Error::InvalidSelector {
                kind: "series",
                value: s.to_string(),
            }),
        }
    }
}

/// One point of a per-country series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub date: String,
    pub country: String,
    pub value: u64,
}

/// Rows of the selected countries projected onto `metric`, in table order.
///
/// "Total" is selectable like any country when the table carries total rows.
pub fn country_series(
    table: &UsageTable,
    metric: SeriesMetric,
    countries: &CountrySelection,
) -> Vec<SeriesPoint> {
    table
        .rows
        .iter()
        .filter(|r| countries.includes(&r.country))
        .map(|r| SeriesPoint {
            date: r.date.clone(),
            country: r.country.clone(),
            value: metric.value(r),
        })
        .collect()
}

/// The `n` countries with the largest summed `metric`, largest first.
///
/// Ties are broken by country name.
pub fn top_countries(table: &UsageTable, metric: SeriesMetric, n: usize) -> Vec<String> {
    let mut sums: HashMap<&str, u64> = HashMap::new();
    for row in &table.rows {
        let sum = sums.entry(row.country.as_str()).or_default();
        *sum = sum.saturating_add(metric.value(row));
    }

    let mut ranked: Vec<(&str, u64)> = sums.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(n)
        .map(|(country, _)| country.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Granularity;
    use crate::usage::add_total_rows;

    fn row(date: &str, country: &str, active: u64, new_users: u64) -> UsageRecord {
        let mut r = UsageRecord::empty(date, country);
        r.active_count = active;
        r.new_users = new_users;
        r.subscribed = active / 2;
        r.interactions = 10;
        r.audio = 7;
        r.text = 3;
        r
    }

    fn sample() -> UsageTable {
        UsageTable {
            granularity: Granularity::Daily,
            rows: vec![
                row("2025-01-02", "AR", 10, 1),
                row("2025-01-01", "AR", 20, 5),
                row("2025-01-01", "BR", 30, 0),
            ],
        }
    }

    #[test]
    fn test_general_series_sums_and_percentages() {
        let series = general_series(&add_total_rows(&sample()));
        assert_eq!(series.len(), 2);

        let first = &series[0];
        assert_eq!(first.date, "2025-01-01");
        assert_eq!(first.active_count, 50);
        assert_eq!(first.new_users_pct, 10.0);
        assert_eq!(first.subscribed_pct, 50.0);
        assert_eq!(first.audio_pct, 70.0);
        assert_eq!(first.text_pct, 30.0);
    }

    #[test]
    fn test_general_series_zero_denominator() {
        let table = UsageTable {
            granularity: Granularity::Daily,
            rows: vec![UsageRecord::empty("2025-01-01", "AR")],
        };
        let series = general_series(&table);
        assert_eq!(series[0].new_users_pct, 0.0);
        assert_eq!(series[0].audio_pct, 0.0);
    }

    #[test]
    fn test_country_series_includes_total_when_selected() {
        let table = add_total_rows(&sample());
        let points = country_series(
            &table,
            SeriesMetric::NewUsers,
            &CountrySelection::from_list(["Total", "AR"]),
        );
        assert_eq!(points.len(), 4);
        assert!(points.iter().any(|p| p.country == "Total" && p.value == 5));

        let audio = country_series(
            &table,
            SeriesMetric::Interactions(InteractionSelector::Audio),
            &CountrySelection::from_list(["BR"]),
        );
        assert_eq!(audio, vec![SeriesPoint {
            date: "2025-01-01".to_string(),
            country: "BR".to_string(),
            value: 7,
        }]);
    }

    #[test]
    fn test_top_countries() {
        let metric = SeriesMetric::Active(MetricSelector::TotalActive);
        assert_eq!(top_countries(&sample(), metric, 1), vec!["AR"]);
        // AR and BR tie at 30
        assert_eq!(top_countries(&sample(), metric, 5), vec!["AR", "BR"]);
        assert!(top_countries(&UsageTable::empty(Granularity::Daily), metric, 3).is_empty());
    }

    #[test]
    fn test_parse_series_metric() {
        assert_eq!(
            "active:Free Users".parse::<SeriesMetric>().unwrap(),
            SeriesMetric::Active(MetricSelector::Free)
        );
        assert_eq!("new_users".parse::<SeriesMetric>().unwrap(), SeriesMetric::NewUsers);
        assert_eq!(
            "interactions:text".parse::<SeriesMetric>().unwrap().key_fragment(),
            "interactions.text"
        );
        assert!("churn".parse::<SeriesMetric>().is_err());
        assert!("active:paying".parse::<SeriesMetric>().is_err());
    }
}
