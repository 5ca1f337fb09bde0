//! Read-only query surface of the document store
//!
//! The dashboard only ever issues two kinds of reads:
//! - `find`: a filtered, projected scan of one collection
//! - `aggregate`: one of a fixed set of grouping pipelines
//!
//! Both are expressed as plain data so a store implementation (SQLite in
//! [`super::Database`], or a stub in tests) can execute them however it
//! likes.

use crate::error::Result;
use serde_json::{Map, Value};
use std::ops::Bound;

/// A decoded document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// A single predicate on a (possibly dotted) document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `lower <= field <= upper`, each side optional
    Range {
        field: String,
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    /// `field == value`
    Eq { field: String, value: Value },
}

/// Conjunction of conditions. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a range condition.
    pub fn range(mut self, field: &str, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        self.conditions.push(Condition::Range {
            field: field.to_string(),
            lower,
            upper,
        });
        self
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }
}

/// Fields returned by `find`. `_id` is never returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    All,
    Fields(Vec<String>),
    /// Every field except the listed ones
    Exclude(Vec<String>),
}

impl Projection {
    pub fn fields(fields: &[&str]) -> Self {
        Projection::Fields(fields.iter().map(|f| f.to_string()).collect())
    }

    pub fn exclude(fields: &[&str]) -> Self {
        Projection::Exclude(fields.iter().map(|f| f.to_string()).collect())
    }

    /// Apply this projection to a decoded document.
    pub fn apply(&self, mut doc: Document) -> Document {
        doc.remove("_id");
        match self {
            Projection::All => doc,
            Projection::Fields(fields) => doc
                .into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect(),
            Projection::Exclude(fields) => doc
                .into_iter()
                .filter(|(k, _)| !fields.iter().any(|f| f == k))
                .collect(),
        }
    }
}

/// The aggregation shapes the dashboard needs.
///
/// Output documents per variant:
/// - `DistinctUsersByCountry`: `{country, users}`, sorted by country
/// - `UsersByCountryAndCycles`: `{country, cycles_consumed, users}`
/// - `UsersByCyclesCountryYear`: `{cycles_consumed, country, last_date, users}`
///   where `last_date` is the year of the record's `last_date` timestamp
/// - `DailyCountByEpoch`: `{localdate, count}`, sorted by date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pipeline {
    /// Distinct `user_id` per country, optionally only where
    /// `cycles_consumed >= max_cycles`
    DistinctUsersByCountry { heavy_only: bool },
    /// Record count per `(country, cycles_consumed)`
    UsersByCountryAndCycles,
    /// Record count per `(cycles_consumed, country, year(last_date))`
    UsersByCyclesCountryYear,
    /// Record count per local day of an epoch-seconds field, for
    /// `from <= field < to`
    DailyCountByEpoch {
        field: String,
        from: i64,
        to: i64,
        utc_offset_secs: i32,
    },
}

impl Pipeline {
    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::DistinctUsersByCountry { .. } => "distinct_users_by_country",
            Pipeline::UsersByCountryAndCycles => "users_by_country_and_cycles",
            Pipeline::UsersByCyclesCountryYear => "users_by_cycles_country_year",
            Pipeline::DailyCountByEpoch { .. } => "daily_count_by_epoch",
        }
    }
}

/// Read-only access to document collections.
///
/// Implementations must be safe to share between request threads.
pub trait DocumentStore: Send + Sync {
    /// Documents of `collection` matching `filter`, in insertion order.
    fn find(&self, collection: &str, filter: &Filter, projection: &Projection)
        -> Result<Vec<Document>>;

    /// Run one of the known aggregation pipelines over `collection`.
    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Document>>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        (**self).find(collection, filter, projection)
    }

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Document>> {
        (**self).aggregate(collection, pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_projection_drops_id() {
        let d = doc(json!({"_id": 1, "date": "2025-01-01", "dau": 3}));
        let projected = Projection::All.apply(d);
        assert!(!projected.contains_key("_id"));
        assert_eq!(projected.len(), 2);
    }

    #[test]
    fn test_projection_fields_and_exclude() {
        let d = doc(json!({"localdate": "2025-01-01", "a": 1, "b": 2}));
        let only = Projection::fields(&["a"]).apply(d.clone());
        assert_eq!(only.keys().collect::<Vec<_>>(), vec!["a"]);

        let without = Projection::exclude(&["localdate"]).apply(d);
        assert_eq!(without.len(), 2);
        assert!(!without.contains_key("localdate"));
    }

    #[test]
    fn test_filter_builder() {
        let filter = Filter::new()
            .range(
                "date",
                Bound::Included(json!("2025-01-01")),
                Bound::Excluded(json!("2025-02-01")),
            )
            .eq("type", "image");
        assert_eq!(filter.conditions.len(), 2);
        assert!(matches!(filter.conditions[1], Condition::Eq { .. }));
    }
}
