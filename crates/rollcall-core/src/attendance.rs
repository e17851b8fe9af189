//! Attendance ledger: a CSV file holding at most one record per person per day.
//!
//! Rows are append-only. Every row already in the file is written back
//! byte for byte, whatever its timestamp format or extra columns, and a new
//! record is appended under the existing header. A rewrite goes through a
//! temporary sibling that is renamed over the original, so readers never see
//! a torn write. The check-then-append sequence is not locked: two writers
//! running at once can still lose each other's records.

use crate::staging;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use csv::ByteRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Columns the ledger must carry for its rows to be trusted.
pub const COLUMNS: [&str; 3] = ["name", "date", "timestamp"];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// One attendance row, as the text found in the file.
///
/// `date` is the dedup key together with `name`; neither field is
/// reinterpreted, so rows written by other tools compare as they read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: String,
    pub timestamp: String,
}

impl AttendanceRecord {
    /// A fresh mark stamped with `timestamp`.
    pub fn new(name: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            date: timestamp.date().format(DATE_FORMAT).to_string(),
            timestamp: timestamp.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn is_on(&self, date: NaiveDate) -> bool {
        self.date == date.format(DATE_FORMAT).to_string()
    }

    /// Whether both date and timestamp parse as calendar values.
    pub fn is_well_formed(&self) -> bool {
        NaiveDate::parse_from_str(&self.date, DATE_FORMAT).is_ok() && parses_as_timestamp(&self.timestamp)
    }
}

/// ISO 8601 with `T` or a space, any fractional precision, optional offset.
fn parses_as_timestamp(text: &str) -> bool {
    text.parse::<NaiveDateTime>().is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || DateTime::parse_from_rfc3339(text).is_ok()
        || DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z").is_ok()
}

/// Positions of [`COLUMNS`] in the file's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnIndex {
    name: usize,
    date: usize,
    timestamp: usize,
}

impl ColumnIndex {
    const CANONICAL: Self = Self {
        name: 0,
        date: 1,
        timestamp: 2,
    };

    fn locate(header: &ByteRecord) -> Option<Self> {
        let find = |wanted: &str| header.iter().position(|h| trimmed(h) == wanted);
        Some(Self {
            name: find("name")?,
            date: find("date")?,
            timestamp: find("timestamp")?,
        })
    }
}

fn trimmed(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim().to_string()
}

fn field(row: &ByteRecord, index: usize) -> String {
    row.get(index).map(trimmed).unwrap_or_default()
}

/// Ledger contents as read from disk.
#[derive(Debug)]
pub struct Ledger {
    /// Every row in file order, read as text.
    pub records: Vec<AttendanceRecord>,
    /// Rows whose date or timestamp does not parse. They are kept as-is.
    pub unparsed_rows: usize,
    /// The file existed but its header lacked one of [`COLUMNS`].
    pub schema_reset: bool,
    header: ByteRecord,
    columns: ColumnIndex,
    rows: Vec<ByteRecord>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            unparsed_rows: 0,
            schema_reset: false,
            header: ByteRecord::from(COLUMNS.to_vec()),
            columns: ColumnIndex::CANONICAL,
            rows: Vec::new(),
        }
    }
}

impl Ledger {
    pub fn contains(&self, name: &str, date: NaiveDate) -> bool {
        self.records.iter().any(|r| r.name == name && r.is_on(date))
    }

    /// Append `record` as a new raw row aligned with the file's header.
    /// Columns other than [`COLUMNS`] are left empty.
    fn push(&mut self, record: AttendanceRecord) {
        let mut fields = vec![""; self.header.len()];
        fields[self.columns.name] = record.name.as_str();
        fields[self.columns.date] = record.date.as_str();
        fields[self.columns.timestamp] = record.timestamp.as_str();
        self.rows.push(ByteRecord::from(fields));
        self.records.push(record);
    }
}

/// Handle to the attendance CSV at a fixed path.
#[derive(Debug, Clone)]
pub struct AttendanceStore {
    path: PathBuf,
}

impl AttendanceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole ledger. A missing file is an empty ledger.
    pub fn load(&self) -> Result<Ledger, AttendanceError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Ledger::default()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let header = reader.byte_headers()?.clone();
        let Some(columns) = ColumnIndex::locate(&header) else {
            tracing::warn!(
                path = %self.path.display(),
                header = ?header,
                "attendance file lacks expected columns, treating as empty"
            );
            return Ok(Ledger {
                schema_reset: true,
                ..Ledger::default()
            });
        };

        let mut ledger = Ledger {
            header,
            columns,
            ..Ledger::default()
        };
        for (line, row) in reader.byte_records().enumerate() {
            let row = row?;
            let record = AttendanceRecord {
                name: field(&row, columns.name),
                date: field(&row, columns.date),
                timestamp: field(&row, columns.timestamp),
            };
            if !record.is_well_formed() {
                ledger.unparsed_rows += 1;
                tracing::debug!(
                    path = %self.path.display(),
                    row = line + 1,
                    date = %record.date,
                    timestamp = %record.timestamp,
                    "attendance row has unrecognised date or timestamp"
                );
            }
            ledger.records.push(record);
            ledger.rows.push(row);
        }

        if ledger.unparsed_rows > 0 {
            tracing::warn!(
                path = %self.path.display(),
                rows = ledger.unparsed_rows,
                "attendance rows with unrecognised dates kept as-is"
            );
        }
        Ok(ledger)
    }

    /// Mark `name` present today. Returns `true` if a record was added.
    pub fn record_if_new(&self, name: &str) -> Result<bool, AttendanceError> {
        self.record_if_new_at(name, Local::now().naive_local())
    }

    /// Mark `name` present on `now`'s calendar day, stamping it with `now`.
    ///
    /// Returns `false` without touching the file if `name` already has a
    /// row whose date text is that day.
    pub fn record_if_new_at(&self, name: &str, now: NaiveDateTime) -> Result<bool, AttendanceError> {
        let mut ledger = self.load()?;
        if ledger.contains(name, now.date()) {
            return Ok(false);
        }

        ledger.push(AttendanceRecord::new(name, now));
        self.rewrite(&ledger)?;
        tracing::info!(name, date = %now.date(), path = %self.path.display(), "attendance recorded");
        Ok(true)
    }

    /// Replace the file with the ledger's header and raw rows.
    fn rewrite(&self, ledger: &Ledger) -> Result<(), AttendanceError> {
        let mut tmp = staging::beside(&self.path)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(tmp.as_file_mut());
            writer.write_byte_record(&ledger.header)?;
            for row in &ledger.rows {
                writer.write_byte_record(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
