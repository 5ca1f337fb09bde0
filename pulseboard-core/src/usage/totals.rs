//! Synthesized "Total" rows.

use crate::types::{UsageRecord, UsageTable, TOTAL_COUNTRY};
use std::collections::HashMap;

/// Append one [`TOTAL_COUNTRY`] row per date summing every numeric column
/// over the real countries.
///
/// Totals follow the table's rows, in first-seen date order. Rows already
/// named "Total" are not summed again, but calling this twice still appends
/// a second set of totals.
pub fn add_total_rows(table: &UsageTable) -> UsageTable {
    let mut totals: Vec<UsageRecord> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for row in table.rows.iter().filter(|r| !r.is_total()) {
        let i = *index.entry(row.date.as_str()).or_insert_with(|| {
            totals.push(UsageRecord::empty(row.date.clone(), TOTAL_COUNTRY));
            totals.len() - 1
        });
        totals[i].accumulate(row);
    }

    let mut rows = Vec::with_capacity(table.rows.len() + totals.len());
    rows.extend(table.rows.iter().cloned());
    rows.extend(totals);

    UsageTable {
        granularity: table.granularity,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Granularity;

    fn row(date: &str, country: &str, active: u64, subscribed: u64) -> UsageRecord {
        let mut r = UsageRecord::empty(date, country);
        r.active_count = active;
        r.subscribed = subscribed;
        r.interactions = active * 2;
        r
    }

    #[test]
    fn test_total_row_sums_every_column() {
        let table = UsageTable {
            granularity: Granularity::Daily,
            rows: vec![
                row("2025-01-01", "AR", 10, 2),
                row("2025-01-01", "BR", 5, 1),
                row("2025-01-02", "AR", 7, 0),
            ],
        };

        let with_total = add_total_rows(&table);
        assert_eq!(with_total.len(), 5);
        assert_eq!(with_total.granularity, Granularity::Daily);

        let totals: Vec<_> = with_total.rows.iter().filter(|r| r.is_total()).collect();
        assert_eq!(totals[0].date, "2025-01-01");
        assert_eq!(totals[0].active_count, 15);
        assert_eq!(totals[0].subscribed, 3);
        assert_eq!(totals[0].interactions, 30);
        assert_eq!(totals[1].date, "2025-01-02");
        assert_eq!(totals[1].active_count, 7);
    }

    #[test]
    fn test_total_row_saturates_at_max() {
        let mut big = UsageRecord::empty("2025-01-01", "AR");
        big.active_count = u64::MAX;
        let mut small = UsageRecord::empty("2025-01-01", "BR");
        small.active_count = 1;
        let table = UsageTable {
            granularity: Granularity::Daily,
            rows: vec![big, small],
        };

        let with_total = add_total_rows(&table);
        assert_eq!(with_total.rows[2].country, TOTAL_COUNTRY);
        assert_eq!(with_total.rows[2].active_count, u64::MAX);
    }

    #[test]
    fn test_empty_table_stays_empty() {
        let table = UsageTable::empty(Granularity::Monthly);
        let with_total = add_total_rows(&table);
        assert!(with_total.is_empty());
        assert_eq!(with_total.granularity, Granularity::Monthly);
    }
}
