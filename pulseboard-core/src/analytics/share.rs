//! Percentage-of-total country shares.

use crate::format::percentage;
use crate::types::{CountrySelection, MetricSelector, ShareMode, UsageTable, OTHERS_COUNTRY};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Share of one country (or "Others") in a date bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareRecord {
    pub date: String,
    pub country: String,
    /// Selected metric for the country
    pub value: u64,
    /// Denominator picked by the share mode
    pub denominator: u64,
    /// `value / denominator * 100`, rounded to 2 decimals
    pub share: f64,
}

#[derive(Default)]
struct Bucket {
    highlighted: BTreeMap<String, u64>,
    others: Option<u64>,
    category_total: u64,
    grand_total: u64,
}

/// Split each date's metric into the highlighted countries plus "Others".
///
/// With [`ShareMode::RelativeToCategory`] the denominator is the date's sum
/// of `metric`; with [`ShareMode::RelativeToTotal`] it is the date's sum of
/// active users. "Total" rows in the input are ignored. An "Others" row is
/// emitted only when some country of the date is not highlighted.
pub fn country_share(
    table: &UsageTable,
    highlighted: &CountrySelection,
    metric: MetricSelector,
    mode: ShareMode,
) -> Vec<ShareRecord> {
    let mut order: Vec<&str> = Vec::new();
    let mut buckets: HashMap<&str, Bucket> = HashMap::new();

    for row in table.rows.iter().filter(|r| !r.is_total()) {
        let bucket = buckets.entry(row.date.as_str()).or_insert_with(|| {
            order.push(row.date.as_str());
            Bucket::default()
        });

        let value = metric.value(row);
        bucket.category_total = bucket.category_total.saturating_add(value);
        bucket.grand_total = bucket.grand_total.saturating_add(row.active_count);

        if highlighted.includes(&row.country) {
            let sum = bucket.highlighted.entry(row.country.clone()).or_default();
            *sum = sum.saturating_add(value);
        } else {
            let others = bucket.others.get_or_insert(0);
            *others = others.saturating_add(value);
        }
    }

    let mut records = Vec::new();
    for date in order {
        let Some(bucket) = buckets.remove(date) else {
            continue;
        };
        let denominator = match mode {
            ShareMode::RelativeToCategory => bucket.category_total,
            ShareMode::RelativeToTotal => bucket.grand_total,
        };

        let others = bucket
            .others
            .map(|value| (OTHERS_COUNTRY.to_string(), value));
        for (country, value) in bucket.highlighted.into_iter().chain(others) {
            records.push(ShareRecord {
                date: date.to_string(),
                country,
                value,
                denominator,
                share: percentage(value as f64, denominator as f64),
            });
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Granularity, UsageRecord};

    fn row(date: &str, country: &str, active: u64, subscribed: u64) -> UsageRecord {
        let mut r = UsageRecord::empty(date, country);
        r.active_count = active;
        r.subscribed = subscribed;
        r
    }

    fn sample() -> UsageTable {
        UsageTable {
            granularity: Granularity::Daily,
            rows: vec![
                row("2025-01-01", "AR", 40, 25),
                row("2025-01-01", "BR", 35, 15),
                row("2025-01-01", "CL", 25, 10),
                row("2025-01-01", "Total", 100, 50),
            ],
        }
    }

    #[test]
    fn test_share_denominator_depends_on_mode() {
        let ar = CountrySelection::from_list(["AR"]);

        let total = country_share(&sample(), &ar, MetricSelector::Subscribed, ShareMode::RelativeToTotal);
        assert_eq!(total[0].country, "AR");
        assert_eq!(total[0].value, 25);
        assert_eq!(total[0].denominator, 100);
        assert_eq!(total[0].share, 25.0);

        let category = country_share(
            &sample(),
            &ar,
            MetricSelector::Subscribed,
            ShareMode::RelativeToCategory,
        );
        assert_eq!(category[0].denominator, 50);
        assert_eq!(category[0].share, 50.0);
    }

    #[test]
    fn test_non_highlighted_countries_collapse_into_others() {
        let shares = country_share(
            &sample(),
            &CountrySelection::from_list(["BR"]),
            MetricSelector::TotalActive,
            ShareMode::RelativeToCategory,
        );

        assert_eq!(shares.len(), 2);
        assert_eq!(shares[1].country, OTHERS_COUNTRY);
        assert_eq!(shares[1].value, 65);
        assert_eq!(shares[1].share, 65.0);
    }

    #[test]
    fn test_free_metric_and_all_selected() {
        let shares = country_share(
            &sample(),
            &CountrySelection::All,
            MetricSelector::Free,
            ShareMode::RelativeToCategory,
        );

        assert_eq!(shares.len(), 3);
        assert!(shares.iter().all(|s| s.country != OTHERS_COUNTRY));
        // AR: 15 free of 50
        assert_eq!(shares[0].share, 30.0);
    }

    #[test]
    fn test_empty_table_and_zero_denominator() {
        let empty = UsageTable::empty(Granularity::Monthly);
        assert!(country_share(
            &empty,
            &CountrySelection::All,
            MetricSelector::TotalActive,
            ShareMode::RelativeToTotal
        )
        .is_empty());

        let zeros = UsageTable {
            granularity: Granularity::Daily,
            rows: vec![row("2025-01-01", "AR", 0, 0)],
        };
        let shares = country_share(
            &zeros,
            &CountrySelection::All,
            MetricSelector::TotalActive,
            ShareMode::RelativeToTotal,
        );
        assert_eq!(shares[0].share, 0.0);
    }
}
