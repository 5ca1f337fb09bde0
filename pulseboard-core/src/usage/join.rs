//! Cross-source join of activity rows with new-user counts.

use crate::error::Result;
use crate::types::{NewUsersTable, UsageRecord, UsageTable};
use std::collections::HashMap;

/// Left-join `new_users` onto `activity` on `(date, country)`.
///
/// Both sides are summed per key first, so duplicate source documents never
/// multiply rows. Activity keys without a new-user count get 0; new-user
/// keys without activity are dropped.
pub fn join_new_users(activity: &UsageTable, new_users: &NewUsersTable) -> Result<UsageTable> {
    activity.granularity.ensure(new_users.granularity)?;

    let mut counts: HashMap<(&str, &str), u64> = HashMap::new();
    for row in &new_users.rows {
        let sum = counts
            .entry((row.date.as_str(), row.country.as_str()))
            .or_default();
        *sum = sum.saturating_add(row.new_users);
    }

    let mut rows = collapse_duplicates(&activity.rows);
    let mut unmatched = 0usize;
    for row in &mut rows {
        match counts.get(&(row.date.as_str(), row.country.as_str())) {
            Some(&n) => row.new_users = n,
            None => {
                row.new_users = 0;
                unmatched += 1;
            }
        }
    }

    tracing::debug!(
        granularity = activity.granularity.as_str(),
        rows = rows.len(),
        unmatched,
        "Joined new users"
    );

    Ok(UsageTable {
        granularity: activity.granularity,
        rows,
    })
}

/// Sum rows sharing a `(date, country)` key, keeping first-seen order.
fn collapse_duplicates(rows: &[UsageRecord]) -> Vec<UsageRecord> {
    let mut out: Vec<UsageRecord> = Vec::with_capacity(rows.len());
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();

    for row in rows {
        match index.get(&(row.date.as_str(), row.country.as_str())) {
            Some(&i) => out[i].accumulate(row),
            None => {
                index.insert((row.date.as_str(), row.country.as_str()), out.len());
                out.push(row.clone());
            }
        }
    }
    out
}
