//! Daily feature activity.
//!
//! Transcription calls carry a precomputed `localdate`; lists and reminders
//! only carry `created_at` epoch seconds, bucketed here to reporting-zone days.

use crate::config::CollectionsConfig;
use crate::db::{DocumentStore, Pipeline, Projection};
use crate::error::Result;
use crate::types::{DateRange, Granularity};
use crate::usage::bucket_filter;
use chrono::{Days, FixedOffset, NaiveDate, NaiveTime};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Events of each feature on one local day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureActivityRecord {
    pub date: String,
    pub image: u64,
    pub document: u64,
    pub video: u64,
    pub youtube: u64,
    pub reminders: u64,
    pub lists: u64,
}

const IMAGE_CALLS: &[(&str, &str)] = &[("type", "image")];
const DOCUMENT_CALLS: &[(&str, &str)] = &[
    ("type", "document"),
    ("event_type", "document_transcription"),
];
const VIDEO_CALLS: &[(&str, &str)] = &[("type", "video")];
const YOUTUBE_CALLS: &[(&str, &str)] = &[("result.type", "youtube_transcription")];

/// A tracked feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Image,
    Document,
    Video,
    Youtube,
    Reminders,
    Lists,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Image,
        Feature::Document,
        Feature::Video,
        Feature::Youtube,
        Feature::Reminders,
        Feature::Lists,
    ];

    fn slot<'a>(&self, record: &'a mut FeatureActivityRecord) -> &'a mut u64 {
        match self {
            Feature::Image => &mut record.image,
            Feature::Document => &mut record.document,
            Feature::Video => &mut record.video,
            Feature::Youtube => &mut record.youtube,
            Feature::Reminders => &mut record.reminders,
            Feature::Lists => &mut record.lists,
        }
    }

    /// Equality conditions selecting this feature's calls, if it is one.
    fn call_filter(&self) -> Option<&'static [(&'static str, &'static str)]> {
        match self {
            Feature::Image => Some(IMAGE_CALLS),
            Feature::Document => Some(DOCUMENT_CALLS),
            Feature::Video => Some(VIDEO_CALLS),
            Feature::Youtube => Some(YOUTUBE_CALLS),
            Feature::Reminders | Feature::Lists => None,
        }
    }
}

/// Per-day feature counts over `range`, outer-joined on date, sorted by date.
///
/// Days where a feature saw no events report 0 for it.
pub fn feature_activity<S: DocumentStore + ?Sized>(
    store: &S,
    collections: &CollectionsConfig,
    range: &DateRange,
    utc_offset: FixedOffset,
) -> Result<Vec<FeatureActivityRecord>> {
    let mut days: BTreeMap<String, FeatureActivityRecord> = BTreeMap::new();

    for feature in Feature::ALL {
        let counts = match (feature, feature.call_filter()) {
            (_, Some(conditions)) => count_calls(store, &collections.calls, conditions, range)?,
            (Feature::Reminders, None) => {
                count_created(store, &collections.reminders, range, utc_offset)?
            }
            (_, None) => count_created(store, &collections.lists, range, utc_offset)?,
        };

        for (date, count) in counts {
            let record = days.entry(date.clone()).or_insert_with(|| FeatureActivityRecord {
                date,
                ..Default::default()
            });
            *feature.slot(record) += count;
        }
    }

    Ok(days.into_values().collect())
}

fn count_calls<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    conditions: &[(&str, &str)],
    range: &DateRange,
) -> Result<BTreeMap<String, u64>> {
    let filter = conditions
        .iter()
        .fold(bucket_filter("localdate", Granularity::Daily, range), |f, (field, value)| {
            f.eq(field, *value)
        });
    let documents = store.find(collection, &filter, &Projection::fields(&["localdate"]))?;

    let mut counts = BTreeMap::new();
    for doc in &documents {
        match doc
            .get("localdate")
            .and_then(Value::as_str)
            .and_then(|raw| Granularity::Daily.normalize_bucket(raw))
        {
            Some(date) => *counts.entry(date).or_default() += 1,
            None => tracing::warn!(collection, "Skipping call without a valid localdate"),
        }
    }
    Ok(counts)
}

fn count_created<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    range: &DateRange,
    utc_offset: FixedOffset,
) -> Result<BTreeMap<String, u64>> {
    let pipeline = Pipeline::DailyCountByEpoch {
        field: "created_at".to_string(),
        from: local_midnight(range.start(), utc_offset),
        to: local_midnight(range.end() + Days::new(1), utc_offset),
        utc_offset_secs: utc_offset.local_minus_utc(),
    };

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for doc in store.aggregate(collection, &pipeline)? {
        let date = doc.get("localdate").and_then(Value::as_str);
        let count = doc.get("count").and_then(Value::as_u64);
        match (date, count) {
            (Some(date), Some(count)) => {
                let sum = counts.entry(date.to_string()).or_default();
                *sum = sum.saturating_add(count);
            }
            _ => tracing::warn!(collection, "Skipping malformed daily count"),
        }
    }
    Ok(counts)
}

/// Epoch seconds of 00:00 on `day` in the reporting zone.
pub fn local_midnight(day: NaiveDate, utc_offset: FixedOffset) -> i64 {
    day.and_time(NaiveTime::MIN).and_utc().timestamp() - i64::from(utc_offset.local_minus_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_midnight() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        // 2025-01-01T03:00:00Z
        assert_eq!(local_midnight(day, offset), 1_735_700_400);
    }

    #[test]
    fn test_only_calls_have_filters() {
        assert!(Feature::Image.call_filter().is_some());
        assert_eq!(Feature::Document.call_filter().map(|c| c.len()), Some(2));
        assert!(Feature::Lists.call_filter().is_none());
    }
}
