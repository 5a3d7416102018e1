//! Append-only attendance stores.

use chrono::NaiveDateTime;
use rollcall_core::AttendanceRecord;
use serde::Deserialize;
use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("cannot write attendance file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("attendance database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Sink for attendance events.
///
/// `append` is synchronous: when it returns `Ok` the record is in the store.
pub trait AttendanceLog {
    fn append(&mut self, label: &str, timestamp: NaiveDateTime) -> Result<AttendanceRecord, AttendanceError>;
}

impl<L: AttendanceLog + ?Sized> AttendanceLog for Box<L> {
    fn append(&mut self, label: &str, timestamp: NaiveDateTime) -> Result<AttendanceRecord, AttendanceError> {
        (**self).append(label, timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceBackend {
    Csv,
    Sqlite,
}

impl std::str::FromStr for AttendanceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown attendance backend: {other}")),
        }
    }
}

/// Open the configured store at `path`.
pub fn open_log(backend: AttendanceBackend, path: &Path) -> Result<Box<dyn AttendanceLog>, AttendanceError> {
    Ok(match backend {
        AttendanceBackend::Csv => Box::new(CsvAttendanceLog::new(path)),
        AttendanceBackend::Sqlite => Box::new(SqliteAttendanceLog::open(path)?),
    })
}

/// `label,YYYY-MM-DD,HH:MM:SS` rows appended to a text file.
pub struct CsvAttendanceLog {
    path: PathBuf,
}

impl CsvAttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> AttendanceError {
        AttendanceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl AttendanceLog for CsvAttendanceLog {
    fn append(&mut self, label: &str, timestamp: NaiveDateTime) -> Result<AttendanceRecord, AttendanceError> {
        let record = AttendanceRecord::new(label, timestamp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let row = format!(
            "{},{},{}\n",
            csv_field(&record.label),
            csv_field(&record.date),
            csv_field(&record.time)
        );
        file.write_all(row.as_bytes()).map_err(|e| self.io_error(e))?;
        file.flush().map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), label, "attendance row appended");
        Ok(record)
    }
}

/// Quote a field only when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Records stored in an `attendance` SQLite table.
pub struct SqliteAttendanceLog {
    conn: rusqlite::Connection,
}

impl SqliteAttendanceLog {
    pub fn open(path: &Path) -> Result<Self, AttendanceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AttendanceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Self::with_connection(rusqlite::Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, AttendanceError> {
        Self::with_connection(rusqlite::Connection::open_in_memory()?)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self, AttendanceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attendance (
                id    INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                date  TEXT NOT NULL,
                time  TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// All records in insertion order.
    #[cfg(test)]
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT label, date, time FROM attendance ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(AttendanceRecord {
                label: row.get(0)?,
                date: row.get(1)?,
                time: row.get(2)?,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl AttendanceLog for SqliteAttendanceLog {
    fn append(&mut self, label: &str, timestamp: NaiveDateTime) -> Result<AttendanceRecord, AttendanceError> {
        let record = AttendanceRecord::new(label, timestamp);
        self.conn.execute(
            "INSERT INTO attendance (label, date, time) VALUES (?1, ?2, ?3)",
            rusqlite::params![record.label, record.date, record.time],
        )?;
        tracing::debug!(label, "attendance row inserted");
        Ok(record)
    }
}
