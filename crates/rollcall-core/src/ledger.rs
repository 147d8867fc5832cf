//! Attendance ledger: who is present today, plus the per-day CSV log.
//!
//! Each identity moves Absent → Present at most once per calendar day. The
//! log is partitioned by date (`attendance_YYYY-MM-DD.csv`); rolling over
//! swaps the in-memory set for whoever already has a row in the new day's log.

use crate::error::ErrorKind;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOG_HEADER: [&str; 3] = ["name", "time", "status"];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance log I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("attendance log {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("malformed row in {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },
    #[error("refusing to overwrite {0}")]
    DestinationExists(PathBuf),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::DestinationExists(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::PersistenceFailure,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        LedgerError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
        }
    }
}

/// One row of the attendance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub time: NaiveTime,
    pub status: AttendanceStatus,
}

/// Result of [`Ledger::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First sighting today; the row is durably logged.
    Recorded(AttendanceRecord),
    /// Already present today; nothing was written.
    AlreadyPresent,
}

pub struct Ledger {
    log_dir: PathBuf,
    day_key: NaiveDate,
    present_today: HashSet<String>,
}

impl Ledger {
    /// Open the ledger for `today`, restoring who is already present from
    /// today's log if it exists.
    pub fn open(log_dir: &Path, today: NaiveDate) -> Result<Self, LedgerError> {
        fs::create_dir_all(log_dir).map_err(|e| LedgerError::io(log_dir, e))?;
        let log_dir = log_dir.to_path_buf();
        let present_today = present_names(&log_path(&log_dir, today))?;
        if !present_today.is_empty() {
            tracing::info!(day = %today, present = present_today.len(), "restored attendance from log");
        }
        Ok(Self {
            log_dir,
            day_key: today,
            present_today,
        })
    }

    /// Mark `name` present at `now`.
    ///
    /// The in-memory transition only happens after the row is on disk; a
    /// failed write leaves the identity absent so it can be retried.
    pub fn record(&mut self, name: &str, now: NaiveDateTime) -> Result<RecordOutcome, LedgerError> {
        self.roll_to(now.date())?;

        if self.present_today.contains(name) {
            tracing::trace!(name, "already present today");
            return Ok(RecordOutcome::AlreadyPresent);
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            time: truncate_to_seconds(now.time()),
            status: AttendanceStatus::Present,
        };
        self.append(&record)?;
        self.present_today.insert(record.name.clone());

        tracing::debug!(name, time = %record.time.format(TIME_FORMAT), "attendance row appended");
        Ok(RecordOutcome::Recorded(record))
    }

    /// Advance to `date` if the calendar day changed. Any change counts,
    /// including the clock moving backwards.
    ///
    /// The new day's log is read before anything changes; on error the
    /// ledger stays on the old day and the next call retries.
    pub fn roll_to(&mut self, date: NaiveDate) -> Result<(), LedgerError> {
        if date == self.day_key {
            return Ok(());
        }
        let present = present_names(&self.log_path(date))?;
        tracing::info!(
            from = %self.day_key,
            to = %date,
            restored = present.len(),
            "attendance day rolled over"
        );
        self.day_key = date;
        self.present_today = present;
        Ok(())
    }

    pub fn day_key(&self) -> NaiveDate {
        self.day_key
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.present_today.contains(name)
    }

    pub fn present_today(&self) -> &HashSet<String> {
        &self.present_today
    }

    /// Names not yet present today, in the order given.
    pub fn absent<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        names
            .into_iter()
            .filter(|n| !self.present_today.contains(*n))
            .collect()
    }

    /// Log file for `date`.
    pub fn log_path(&self, date: NaiveDate) -> PathBuf {
        log_path(&self.log_dir, date)
    }

    /// All rows logged on `date`; empty when no log exists for that day.
    pub fn records(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        read_log(&self.log_path(date))
    }

    /// Copy the rows of `date` to a new CSV at `dest`.
    pub fn export(&self, date: NaiveDate, dest: &Path) -> Result<usize, LedgerError> {
        let records = self.records(date)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(dest) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LedgerError::DestinationExists(dest.to_path_buf()))
            }
            Err(e) => return Err(LedgerError::io(dest, e)),
        };
        file.write_all(UTF8_BOM).map_err(|e| LedgerError::io(dest, e))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(LOG_HEADER).map_err(|e| LedgerError::csv(dest, e))?;
        for r in &records {
            write_row(&mut writer, r).map_err(|e| LedgerError::csv(dest, e))?;
        }
        writer.flush().map_err(|e| LedgerError::io(dest, e))?;
        Ok(records.len())
    }

    fn append(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let path = self.log_path(self.day_key);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::io(&path, e))?;
        let fresh = file.metadata().map_err(|e| LedgerError::io(&path, e))?.len() == 0;
        if fresh {
            file.write_all(UTF8_BOM).map_err(|e| LedgerError::io(&path, e))?;
        }

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut file);
        if fresh {
            writer.write_record(LOG_HEADER).map_err(|e| LedgerError::csv(&path, e))?;
        }
        write_row(&mut writer, record).map_err(|e| LedgerError::csv(&path, e))?;
        writer.flush().map_err(|e| LedgerError::io(&path, e))?;
        drop(writer);
        file.sync_data().map_err(|e| LedgerError::io(&path, e))
    }
}

/// `attendance_YYYY-MM-DD.csv` inside `log_dir`.
pub fn log_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("attendance_{}.csv", date.format("%Y-%m-%d")))
}

/// Read a day log. A leading UTF-8 BOM is ignored; a missing file is empty.
pub fn read_log(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LedgerError::io(path, e)),
    };
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body);
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| LedgerError::csv(path, e))?;
        records.push(parse_row(path, &row)?);
    }
    Ok(records)
}

/// Names with a row in a day log, for restoring presence.
///
/// Only the name column matters here, so rows with a bad time or status
/// still count; they are logged and otherwise ignored.
fn present_names(path: &Path) -> Result<HashSet<String>, LedgerError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(LedgerError::io(path, e)),
    };
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body);
    let mut names = HashSet::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| LedgerError::csv(path, e))?;
        if let Err(e) = parse_row(path, &row) {
            tracing::warn!(path = %path.display(), row = line + 2, error = %e, "malformed attendance row");
        }
        match row.get(0) {
            Some(name) if !name.is_empty() => {
                names.insert(name.to_string());
            }
            _ => {}
        }
    }
    Ok(names)
}

fn parse_row(path: &Path, row: &csv::StringRecord) -> Result<AttendanceRecord, LedgerError> {
    let malformed = |detail: String| LedgerError::Malformed {
        path: path.to_path_buf(),
        detail,
    };
    let (Some(name), Some(time), Some(status)) = (row.get(0), row.get(1), row.get(2)) else {
        return Err(malformed(format!("expected 3 columns, got {}", row.len())));
    };
    let time = NaiveTime::parse_from_str(time, TIME_FORMAT)
        .map_err(|e| malformed(format!("time {time:?}: {e}")))?;
    let status = match status {
        "present" => AttendanceStatus::Present,
        other => return Err(malformed(format!("unknown status {other:?}"))),
    };
    Ok(AttendanceRecord {
        name: name.to_string(),
        time,
        status,
    })
}

fn write_row<W: Write>(writer: &mut csv::Writer<W>, record: &AttendanceRecord) -> csv::Result<()> {
    let time = record.time.format(TIME_FORMAT).to_string();
    writer.write_record([record.name.as_str(), time.as_str(), record.status.as_str()])
}

fn truncate_to_seconds(t: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    t.with_nanosecond(0).unwrap_or(t)
}
