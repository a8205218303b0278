//! Append-only CSV attendance ledger.
//!
//! One row per person per day. The set of people already recorded today is
//! kept in memory and rebuilt from the file on reload; a key only enters
//! the set after its row has been written.

use crate::identity::{DecodeError, Identity};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column header every ledger file starts with.
pub const HEADER: [&str; 5] = ["date", "time", "name", "student_id", "confidence"];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("ledger {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("ledger {} has an unexpected header {found:?}", path.display())]
    HeaderMismatch { path: PathBuf, found: Vec<String> },
}

/// One persisted attendance row.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub identity: Identity,
    pub confidence: f32,
}

impl AttendanceRecord {
    pub fn key(&self) -> String {
        self.identity.key()
    }

    fn to_row(&self) -> [String; 5] {
        [
            self.date.format(DATE_FORMAT).to_string(),
            self.time.format(TIME_FORMAT).to_string(),
            self.identity.name.clone(),
            self.identity.student_id.clone(),
            format!("{:.1}", self.confidence),
        ]
    }

    fn from_row(row: &StringRecord) -> Result<Self, DecodeError> {
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let malformed = |reason: String| DecodeError::MalformedRow { line, reason };

        let (date, identity) = parse_date_and_identity(row)?;
        let time_field = row.get(1).unwrap_or("").trim();
        let time = NaiveTime::parse_from_str(time_field, TIME_FORMAT)
            .map_err(|e| malformed(format!("time {time_field:?}: {e}")))?;
        let confidence_field = row.get(4).unwrap_or("").trim();
        let confidence = confidence_field
            .parse::<f32>()
            .map_err(|e| malformed(format!("confidence {confidence_field:?}: {e}")))?;

        Ok(Self {
            date,
            time,
            identity,
            confidence,
        })
    }
}

/// The fields needed to rebuild the present set: date, name and student id.
fn parse_date_and_identity(row: &StringRecord) -> Result<(NaiveDate, Identity), DecodeError> {
    let line = row.position().map(|p| p.line()).unwrap_or(0);
    let malformed = |reason: String| DecodeError::MalformedRow { line, reason };

    if row.len() < 4 {
        return Err(malformed(format!("expected at least 4 fields, got {}", row.len())));
    }

    let date_field = row.get(0).unwrap_or("").trim();
    let date = NaiveDate::parse_from_str(date_field, DATE_FORMAT)
        .map_err(|e| malformed(format!("date {date_field:?}: {e}")))?;

    let name = row.get(2).unwrap_or("");
    if name.is_empty() {
        return Err(malformed("empty name".to_string()));
    }
    let student_id = row.get(3).unwrap_or("");

    Ok((date, Identity::new(name, student_id)))
}

/// Serialize one CSV row, including the trailing newline.
fn encode_row<I, T>(fields: I) -> Result<Vec<u8>, csv::Error>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Date-partitioned attendance ledger backed by a CSV file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    date: NaiveDate,
    present: HashSet<String>,
}

impl Ledger {
    /// A ledger for `path` whose present set is empty for `date`. Touches no files.
    pub fn new(path: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            path: path.into(),
            date,
            present: HashSet::new(),
        }
    }

    /// Create or validate the store, then load who is already present on `date`.
    pub fn open(path: impl Into<PathBuf>, date: NaiveDate) -> Result<Self, StorageError> {
        let mut ledger = Self::new(path, date);
        ledger.initialize()?;
        ledger.present = ledger.scan_present(date)?;
        tracing::info!(
            path = %ledger.path.display(),
            %date,
            present = ledger.present.len(),
            "ledger opened"
        );
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Date the present set belongs to.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Write the header if the store is missing or empty; otherwise check it.
    pub fn initialize(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let needs_header = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(self.io_error(e)),
        };

        if needs_header {
            let header = encode_row(HEADER).map_err(|e| self.csv_error(e))?;
            self.append_bytes(&header)?;
            tracing::info!(path = %self.path.display(), "created attendance ledger");
            return Ok(());
        }

        self.reader().map(|_| ())
    }

    /// Rebuild the present set for `date` from the store.
    ///
    /// A missing store yields an empty set. If the store cannot be read the
    /// previous set is kept and a warning is logged. Returns the number of
    /// people present.
    pub fn load_today(&mut self, date: NaiveDate) -> usize {
        match self.scan_present(date) {
            Ok(present) => {
                self.date = date;
                self.present = present;
                tracing::info!(%date, present = self.present.len(), "attendance loaded");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    %date,
                    "could not reload attendance; keeping previous state"
                );
            }
        }
        self.present.len()
    }

    /// Record `key` as present at `now` unless it already is today.
    ///
    /// Returns `Ok(true)` when a row was appended. The key is only marked
    /// present once the row is on disk. A `now` on a different day than the
    /// loaded one reloads the present set for that day first; if that reload
    /// fails the error is returned and nothing is written.
    pub fn record(
        &mut self,
        key: &str,
        confidence: f32,
        now: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        if now.date() != self.date {
            tracing::info!(
                from = %self.date,
                to = %now.date(),
                "date changed; reloading attendance"
            );
            self.present = self.scan_present(now.date())?;
            self.date = now.date();
        }

        let identity = Identity::decode(key);
        if identity.is_unknown() {
            tracing::debug!(key, "not recording unknown identity");
            return Ok(false);
        }

        let canonical = identity.key();
        if self.present.contains(&canonical) {
            return Ok(false);
        }

        let record = AttendanceRecord {
            date: now.date(),
            time: now.time(),
            identity,
            confidence,
        };
        let row = encode_row(record.to_row()).map_err(|e| self.csv_error(e))?;
        self.append_bytes(&row)?;
        self.present.insert(canonical);

        tracing::info!(
            name = %record.identity.name,
            student_id = %record.identity.student_id,
            confidence,
            "attendance recorded"
        );
        Ok(true)
    }

    pub fn is_present(&self, key: &str) -> bool {
        self.present.contains(&Identity::decode(key).key())
    }

    pub fn present_count(&self) -> usize {
        self.present.len()
    }

    /// Everyone present today, ordered by composite key.
    pub fn summary(&self) -> Vec<Identity> {
        let mut keys: Vec<&String> = self.present.iter().collect();
        keys.sort();
        keys.into_iter().map(|k| Identity::decode(k)).collect()
    }

    /// Every well-formed row in the store, in file order.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, StorageError> {
        let Some(mut reader) = self.reader()? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for result in reader.records() {
            let row = match result {
                Ok(row) => row,
                Err(e) if e.is_io_error() => return Err(self.csv_error(e)),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable ledger row");
                    continue;
                }
            };
            match AttendanceRecord::from_row(&row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(error = %e, "skipping malformed ledger row"),
            }
        }
        Ok(records)
    }

    /// Well-formed rows for a single date.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StorageError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.date == date)
            .collect())
    }

    fn scan_present(&self, date: NaiveDate) -> Result<HashSet<String>, StorageError> {
        let mut present = HashSet::new();
        let Some(mut reader) = self.reader()? else {
            return Ok(present);
        };

        for result in reader.records() {
            let row = match result {
                Ok(row) => row,
                Err(e) if e.is_io_error() => return Err(self.csv_error(e)),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable ledger row");
                    continue;
                }
            };
            match parse_date_and_identity(&row) {
                Ok((row_date, identity)) if row_date == date => {
                    present.insert(identity.key());
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "skipping malformed ledger row"),
            }
        }
        Ok(present)
    }

    /// Open the store for reading with its header checked. `None` if it does not exist.
    fn reader(&self) -> Result<Option<csv::Reader<File>>, StorageError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader.headers().map_err(|e| self.csv_error(e))?;
        let matches = headers.len() >= HEADER.len()
            && HEADER
                .iter()
                .zip(headers.iter())
                .all(|(want, got)| *want == got.trim());
        if !matches {
            return Err(StorageError::HeaderMismatch {
                path: self.path.clone(),
                found: headers.iter().map(str::to_string).collect(),
            });
        }

        Ok(Some(reader))
    }

    /// Append bytes in a single write, prefixing the header if the file is empty.
    fn append_bytes(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let is_empty = file.metadata().map_err(|e| self.io_error(e))?.len() == 0;
        let mut buf = Vec::with_capacity(bytes.len() + 64);
        if is_empty && !bytes.starts_with(HEADER[0].as_bytes()) {
            buf.extend(encode_row(HEADER).map_err(|e| self.csv_error(e))?);
        }
        buf.extend_from_slice(bytes);

        file.write_all(&buf).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> StorageError {
        StorageError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}
