//! Error-rate series.
//!
//! The errors collection holds one document per day: a `localdate` plus one
//! numeric column per error kind (`total_errors`, `INVALID_FORMAT`, ...).
//! The invalid-format collection has the same shape with one column per
//! rejected file type.

use crate::db::{Document, DocumentStore, Filter, Projection};
use crate::error::{Error, Result};
use crate::types::{DateRange, Granularity};
use crate::usage::bucket_filter;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Date field of the error collections.
const DATE_FIELD: &str = "localdate";

/// Error counts per bucket and kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSeries {
    pub granularity: Granularity,
    /// Every error kind seen, sorted
    pub kinds: Vec<String>,
    pub rows: Vec<ErrorSeriesRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSeriesRow {
    pub date: String,
    #[serde(flatten)]
    pub counts: BTreeMap<String, u64>,
}

impl ErrorSeries {
    /// Keep only the listed kinds. Unknown kinds are rejected.
    pub fn select(&self, kinds: &[String]) -> Result<ErrorSeries> {
        if let Some(unknown) = kinds.iter().find(|k| !self.kinds.contains(k)) {
            return Err(Error::InvalidSelector {
                kind: "error",
                value: unknown.clone(),
            });
        }

        let rows = self
            .rows
            .iter()
            .map(|row| ErrorSeriesRow {
                date: row.date.clone(),
                counts: kinds
                    .iter()
                    .map(|k| (k.clone(), row.counts.get(k).copied().unwrap_or(0)))
                    .collect(),
            })
            .collect();

        Ok(ErrorSeries {
            granularity: self.granularity,
            kinds: kinds.to_vec(),
            rows,
        })
    }
}

/// Error counts per day, or summed per month, sorted by date.
pub fn error_series<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    granularity: Granularity,
) -> Result<ErrorSeries> {
    let documents = store.find(collection, &Filter::new(), &Projection::All)?;

    let mut buckets: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    let mut kinds = BTreeSet::new();

    for doc in &documents {
        let Some(date) = doc
            .get(DATE_FIELD)
            .and_then(Value::as_str)
            .and_then(|raw| granularity.normalize_bucket(raw))
        else {
            tracing::warn!(collection, "Skipping error document without a valid localdate");
            continue;
        };

        let counts = buckets.entry(date).or_default();
        for (kind, value) in numeric_columns(doc) {
            kinds.insert(kind.to_string());
            let sum = counts.entry(kind.to_string()).or_default();
            *sum = sum.saturating_add(value);
        }
    }

    Ok(ErrorSeries {
        granularity,
        kinds: kinds.into_iter().collect(),
        rows: buckets
            .into_iter()
            .map(|(date, counts)| ErrorSeriesRow { date, counts })
            .collect(),
    })
}

/// Count of one rejected file type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidFormatCount {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u64,
}

/// Invalid-format error counts per file type over `range`, sorted by type.
pub fn invalid_format_types<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    range: &DateRange,
) -> Result<Vec<InvalidFormatCount>> {
    let documents = store.find(
        collection,
        &bucket_filter(DATE_FIELD, Granularity::Daily, range),
        &Projection::exclude(&[DATE_FIELD]),
    )?;

    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for doc in &documents {
        for (kind, value) in numeric_columns(doc) {
            let sum = totals.entry(kind).or_default();
            *sum = sum.saturating_add(value);
        }
    }

    Ok(totals
        .into_iter()
        .map(|(kind, count)| InvalidFormatCount {
            kind: kind.to_string(),
            count,
        })
        .collect())
}

/// Non-negative integer columns of a document, skipping the date field.
fn numeric_columns(doc: &Document) -> impl Iterator<Item = (&str, u64)> {
    doc.iter()
        .filter(|(key, _)| key.as_str() != DATE_FIELD)
        .filter_map(|(key, value)| {
            let count = value
                .as_u64()
                .or_else(|| value.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64));
            if count.is_none() && !value.is_null() {
                tracing::debug!(column = %key, "Ignoring non-count column");
            }
            count.map(|c| (key.as_str(), c))
        })
}
