//! Read-only views over the ledger for the `summary` and `report` commands.

use chrono::NaiveDate;
use rollcall_core::{AttendanceRecord, Identity, Ledger, StorageError};
use std::collections::BTreeMap;

/// Everyone with a row on `date`, sorted by key with duplicates removed.
pub fn people_on(ledger: &Ledger, date: NaiveDate) -> Result<Vec<Identity>, StorageError> {
    let mut people: Vec<Identity> = ledger
        .records_on(date)?
        .into_iter()
        .map(|r| r.identity)
        .collect();
    people.sort_by_key(|p| p.key());
    people.dedup();
    Ok(people)
}

/// Records grouped by date, oldest first, in ledger order within a day.
pub fn group_by_date(
    records: Vec<AttendanceRecord>,
) -> BTreeMap<NaiveDate, Vec<AttendanceRecord>> {
    let mut by_date: BTreeMap<NaiveDate, Vec<AttendanceRecord>> = BTreeMap::new();
    for record in records {
        by_date.entry(record.date).or_default().push(record);
    }
    by_date
}

pub fn report_lines(by_date: &BTreeMap<NaiveDate, Vec<AttendanceRecord>>) -> Vec<String> {
    let mut lines = Vec::new();
    for (date, records) in by_date {
        lines.push(format!("{date}  ({} present)", records.len()));
        lines.extend(records.iter().map(|r| {
            format!(
                "  {}  {:<24} {:>6.1}",
                r.time.format("%H:%M:%S"),
                r.identity.to_string(),
                r.confidence
            )
        }));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn ledger_with(dir: &TempDir, rows: &str) -> Ledger {
        let path = dir.path().join("attendance.csv");
        fs::write(&path, format!("date,time,name,student_id,confidence\n{rows}")).unwrap();
        Ledger::new(path, day(1))
    }

    #[test]
    fn test_people_on_sorts_and_dedups() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_with(
            &dir,
            "2024-04-01,09:00:00,Carol,003,40.0\n\
             2024-04-01,09:01:00,Alice,001,41.0\n\
             2024-04-01,09:30:00,Carol,003,42.0\n\
             2024-04-02,09:00:00,Bob,002,40.0\n",
        );

        let people = people_on(&ledger, day(1)).unwrap();
        let keys: Vec<String> = people.iter().map(Identity::key).collect();
        assert_eq!(keys, vec!["Alice_001", "Carol_003"]);

        assert_eq!(people_on(&ledger, day(2)).unwrap().len(), 1);
        assert!(people_on(&ledger, day(3)).unwrap().is_empty());
    }

    #[test]
    fn test_people_on_missing_ledger_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("none.csv"), day(1));
        assert!(people_on(&ledger, day(1)).unwrap().is_empty());
    }

    #[test]
    fn test_people_on_rejects_foreign_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "when,who\n2024-04-01,Alice\n").unwrap();
        let ledger = Ledger::new(path, day(1));
        assert!(matches!(
            people_on(&ledger, day(1)),
            Err(StorageError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn test_report_groups_by_date() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger_with(
            &dir,
            "2024-04-02,08:00:00,Bob,002,50.0\n\
             2024-04-01,09:00:00,Alice,001,40.0\n\
             2024-04-02,08:05:00,Alice,001,45.5\n",
        );

        let by_date = group_by_date(ledger.records().unwrap());
        let dates: Vec<NaiveDate> = by_date.keys().copied().collect();
        assert_eq!(dates, vec![day(1), day(2)]);
        assert_eq!(by_date[&day(2)].len(), 2);
        assert_eq!(by_date[&day(2)][0].identity.name, "Bob");

        let lines = report_lines(&by_date);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "2024-04-01  (1 present)");
        assert!(lines[1].starts_with("  09:00:00  Alice (001)"));
        assert!(lines[1].ends_with("40.0"));
        assert_eq!(lines[2], "2024-04-02  (2 present)");
        assert!(lines[4].ends_with("45.5"));
    }

    #[test]
    fn test_empty_report() {
        assert!(report_lines(&group_by_date(Vec::new())).is_empty());
    }
}
