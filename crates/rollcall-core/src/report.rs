//! Aggregations over the attendance ledger for display.

use crate::attendance::AttendanceRecord;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Number of attendance records for one person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaysPresent {
    pub name: String,
    pub days: usize,
}

/// Count records per person, ordered by name.
pub fn days_present(records: &[AttendanceRecord]) -> Vec<DaysPresent> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.name.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(name, days)| DaysPresent {
            name: name.to_string(),
            days,
        })
        .collect()
}

/// Records marked on `date`, in ledger order.
pub fn on_date(records: &[AttendanceRecord], date: NaiveDate) -> Vec<&AttendanceRecord> {
    records.iter().filter(|r| r.is_on(date)).collect()
}
