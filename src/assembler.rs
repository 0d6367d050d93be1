//! Builds the live changelog snapshot from freshly summarized records.
//!
//! # Replacement policy
//!
//! A generation run owns the PR-derived records its [`GenerationScope`]
//! covers. Those are discarded from the previous snapshot and replaced by
//! the new set, whatever the new set contains. PR-derived records outside
//! the scope are carried forward unchanged. Manual entries always come from
//! the manual-entry log, never from the previous snapshot, so a generation
//! run can neither drop nor alter them.
//!
//! # Ordering
//!
//! - `changes` is keyed by `YYYY-MM-DD`; within a day, PR-derived records
//!   are sorted by PR number ascending, followed by manual entries in log
//!   order. The result does not depend on the order `new_records` arrive in.
//! - `categories` is built by walking dates oldest first and records in
//!   stored order, appending each record's category key (PR number, or the
//!   negated manual id) under its type. Empty buckets are omitted.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{date_key, ChangeRecord, GenerationScope, Snapshot};

/// Everything [`assemble`] needs, gathered by the caller.
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub repo_id: &'a str,
    /// The stored snapshot, if any. Only its out-of-scope PR records are used.
    pub previous: Option<&'a Snapshot>,
    /// The manual-entry log, oldest first.
    pub manual_entries: &'a [ChangeRecord],
    /// Published version labels, in publish order.
    pub versions: &'a [String],
    pub scope: GenerationScope,
    pub new_records: Vec<ChangeRecord>,
    pub generated_at: DateTime<Utc>,
}

pub fn assemble(input: AssemblyInput<'_>) -> Snapshot {
    let mut fresh: Vec<ChangeRecord> = Vec::with_capacity(input.new_records.len());
    let mut fresh_numbers: HashSet<i64> = HashSet::new();
    for record in input.new_records {
        match record.pr_number {
            Some(number) if fresh_numbers.insert(number) => fresh.push(record),
            _ => {}
        }
    }

    let carried = input
        .previous
        .into_iter()
        .flat_map(|s| s.records())
        .filter(|r| !r.is_manual() && !input.scope.covers(r))
        .filter(|r| r.pr_number.map_or(true, |n| !fresh_numbers.contains(&n)))
        .cloned();

    let mut changes: BTreeMap<String, Vec<ChangeRecord>> = BTreeMap::new();
    for record in carried.chain(fresh) {
        changes.entry(date_key(record.date)).or_default().push(record);
    }
    for bucket in changes.values_mut() {
        bucket.sort_by_key(|r| r.pr_number);
    }

    for record in input.manual_entries {
        changes
            .entry(date_key(record.date))
            .or_default()
            .push(record.clone());
    }

    let categories = build_categories(&changes);

    Snapshot {
        repo_id: input.repo_id.to_string(),
        generated_at: input.generated_at,
        changes,
        categories,
        versions: input.versions.to_vec(),
    }
}

/// Category label → keys, in date-then-stored order.
pub fn build_categories(
    changes: &BTreeMap<String, Vec<ChangeRecord>>,
) -> BTreeMap<String, Vec<i64>> {
    let mut categories: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for record in changes.values().flatten() {
        if let Some(key) = record.category_key() {
            categories
                .entry(record.change_type.as_str().to_string())
                .or_default()
                .push(key);
        }
    }
    categories
}

/// Check the category index against the records.
///
/// Every indexed key must sit in exactly one bucket, the bucket must match
/// the record's type, and every record must be indexed.
pub fn verify(snapshot: &Snapshot) -> Result<()> {
    let mut seen: HashSet<i64> = HashSet::new();
    for (label, keys) in &snapshot.categories {
        for key in keys {
            if !seen.insert(*key) {
                return Err(inconsistent(format!("key {} indexed more than once", key)));
            }
            let record = snapshot
                .find(*key)
                .ok_or_else(|| inconsistent(format!("key {} has no record", key)))?;
            if record.change_type.as_str() != label {
                return Err(inconsistent(format!(
                    "key {} filed under '{}' but has type '{}'",
                    key, label, record.change_type
                )));
            }
        }
    }

    for (date, records) in &snapshot.changes {
        for record in records {
            if date_key(record.date) != *date {
                return Err(inconsistent(format!(
                    "record '{}' dated {} stored under {}",
                    record.summary, record.date, date
                )));
            }
            match record.category_key() {
                Some(key) if seen.contains(&key) => {}
                _ => {
                    return Err(inconsistent(format!(
                        "record '{}' is missing from the category index",
                        record.summary
                    )))
                }
            }
        }
    }
    Ok(())
}

fn inconsistent(detail: String) -> Error {
    Error::Validation(format!("inconsistent snapshot: {}", detail))
}
