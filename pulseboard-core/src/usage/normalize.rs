//! Record normalization
//!
//! Turns raw activity and new-user documents into canonical rows. Both
//! source shapes carry the same columns under different names:
//!
//! | Granularity | Date field | Count field |
//! |-------------|------------|-------------|
//! | Daily       | `date`     | `dau`       |
//! | Monthly     | `month`    | `mau`       |

use crate::db::Document;
use crate::error::Error;
use crate::types::{DateRange, Granularity, NewUsersRecord, NewUsersTable, UsageRecord, UsageTable};
use serde_json::Value;
use std::collections::HashMap;

/// Field holding the bucket date in activity documents.
pub fn date_field(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Daily => "date",
        Granularity::Monthly => "month",
    }
}

/// Field holding the active-user count in activity documents.
pub fn count_field(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Daily => "dau",
        Granularity::Monthly => "mau",
    }
}

/// Normalize raw activity documents into a canonical table.
///
/// Rows outside `range` are dropped. Malformed documents are skipped with a
/// warning; rows breaking a cross-column invariant are kept with a warning.
/// `new_users` is left at 0 for the joiner to fill.
pub fn normalize(documents: Vec<Document>, granularity: Granularity, range: &DateRange) -> UsageTable {
    let source = format!("{} activity", granularity.as_str());
    let mut rows = Vec::with_capacity(documents.len());
    let mut skipped = 0usize;

    for doc in &documents {
        let row = match parse_usage(doc, granularity) {
            Ok(row) => row,
            Err(reason) => {
                skipped += 1;
                let err = Error::MalformedRecord {
                    collection: source.clone(),
                    reason,
                };
                tracing::warn!(error = %err, "Skipping document");
                continue;
            }
        };

        if !range.contains_bucket(granularity, &row.date) {
            continue;
        }

        if let Err(e) = row.validate() {
            tracing::warn!(collection = %source, error = %e, "Keeping row with inconsistent counts");
        }
        rows.push(row);
    }

    tracing::debug!(
        granularity = granularity.as_str(),
        %range,
        documents = documents.len(),
        rows = rows.len(),
        skipped,
        "Normalized activity"
    );

    UsageTable { granularity, rows }
}

/// Normalize new-user documents, bucketed to `granularity` and summed per
/// `(bucket, country)` in first-seen order.
///
/// The source is always daily; monthly tables bucket each day to its month.
pub fn normalize_new_users(
    documents: Vec<Document>,
    granularity: Granularity,
    range: &DateRange,
) -> NewUsersTable {
    let mut rows: Vec<NewUsersRecord> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for doc in &documents {
        let parsed = required_str(doc, "country").and_then(|country| {
            let date = bucket_of(doc, "date", granularity)?;
            let new_users = read_count(doc, "new_users", true)?;
            Ok((date, country, new_users))
        });

        let (date, country, new_users) = match parsed {
            Ok(parsed) => parsed,
            Err(reason) => {
                tracing::warn!(collection = "new users", %reason, "Skipping malformed document");
                continue;
            }
        };

        if !range.contains_bucket(granularity, &date) {
            continue;
        }

        match index.get(&(date.clone(), country.clone())) {
            Some(&i) => rows[i].new_users = rows[i].new_users.saturating_add(new_users),
            None => {
                index.insert((date.clone(), country.clone()), rows.len());
                rows.push(NewUsersRecord {
                    date,
                    country,
                    new_users,
                });
            }
        }
    }

    NewUsersTable { granularity, rows }
}

fn parse_usage(doc: &Document, granularity: Granularity) -> Result<UsageRecord, String> {
    let country = required_str(doc, "country")?;
    let date = bucket_of(doc, date_field(granularity), granularity)?;

    Ok(UsageRecord {
        date,
        country,
        active_count: read_count(doc, count_field(granularity), true)?,
        new_users: 0,
        subscribed: read_count(doc, "subscribed", false)?,
        interactions: read_count(doc, "interactions", false)?,
        audio: read_count(doc, "audio", false)?,
        text: read_count(doc, "text", false)?,
    })
}

fn required_str(doc: &Document, field: &str) -> Result<String, String> {
    match doc.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Null) | None => Err(format!("missing {field}")),
        Some(other) => Err(format!("{field} is not a string: {other}")),
    }
}

fn bucket_of(doc: &Document, field: &str, granularity: Granularity) -> Result<String, String> {
    let raw = required_str(doc, field)?;
    granularity
        .normalize_bucket(&raw)
        .ok_or_else(|| format!("unparseable {field} '{raw}'"))
}

/// Read a non-negative integer count. Integral floats (`3.0`) are accepted.
///
/// Optional columns default to 0 when absent or null.
pub(crate) fn read_count(doc: &Document, field: &str, required: bool) -> Result<u64, String> {
    match doc.get(field) {
        Some(Value::Null) | None if required => Err(format!("missing {field}")),
        Some(Value::Null) | None => Ok(0),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
                _ => Err(format!("{field} is not a non-negative integer: {n}")),
            }
        }
        Some(other) => Err(format!("{field} is not a number: {other}")),
    }
}
