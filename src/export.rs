//! Export Recorder - CSV Formatting and Hand-off
//!
//! Formatting is pure: the same record always yields the same bytes.
//! Only the sink touches the filesystem.

use chrono::NaiveDate;
use csv::{Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::encoder::CredentialRecord;
use crate::hashing::{record_fingerprint, sha256_hex};

pub const CSV_HEADER: [&str; 4] = ["Student ID", "Name", "Serial A", "Serial B"];
pub const BATCH_CSV_HEADER: [&str; 5] = ["Student ID", "Name", "Serial A", "Serial B", "Encoded Date"];
pub const CSV_MEDIA_TYPE: &str = "text/csv;charset=utf-8";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV buffer error: {0}")]
    Buffer(String),

    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Failed to write {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Nothing to export")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub filename: String,
    pub media_type: String,
    pub content: String,
    pub sha256: String,
}

impl ExportedFile {
    fn csv(filename: String, content: String) -> Self {
        let sha256 = sha256_hex(content.as_bytes());
        Self {
            filename,
            media_type: CSV_MEDIA_TYPE.to_string(),
            content,
            sha256,
        }
    }

    /// Single-record export named after the student's external ID
    pub fn for_record(record: &CredentialRecord) -> Result<Self, ExportError> {
        Ok(Self::csv(export_filename(&record.student_id), to_csv(record)?))
    }

    pub fn bytes(&self) -> &[u8] {
        self.content.as_bytes()
    }
}

/// Header plus one row. Commas, quotes and newlines are quoted by the writer.
pub fn to_csv(record: &CredentialRecord) -> Result<String, ExportError> {
    write_rows(&CSV_HEADER, [record_row(record)])
}

pub fn export_filename(student_id: &str) -> String {
    format!("student_serials_{}.csv", sanitize_filename_part(student_id))
}

pub fn batch_filename(date: NaiveDate) -> String {
    format!("badge_serials_{}.csv", date.format("%Y-%m-%d"))
}

fn record_row(record: &CredentialRecord) -> Vec<String> {
    vec![
        record.student_id.clone(),
        record.student_name.clone(),
        record.system_a_serial.clone(),
        record.system_b_serial.clone(),
    ]
}

fn write_rows<I>(header: &[&str], rows: I) -> Result<String, ExportError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(vec![]);
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(&row)?;
    }

    let bytes = writer.into_inner().map_err(|e| ExportError::Buffer(e.to_string()))?;
    let mut text = String::from_utf8(bytes)?;
    // No terminator after the last row
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

fn sanitize_filename_part(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

/// Where finished exports are handed off
pub trait ExportSink {
    fn deliver(&self, file: &ExportedFile) -> Result<PathBuf, ExportError>;
}

/// Writes exports into a directory, overwriting same-named files
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ExportSink for DirectorySink {
    fn deliver(&self, file: &ExportedFile) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.dir).map_err(|e| ExportError::Io(self.dir.clone(), e))?;
        let path = self.dir.join(&file.filename);
        fs::write(&path, file.bytes()).map_err(|e| ExportError::Io(path.clone(), e))?;
        info!(path = %path.display(), sha256 = %file.sha256, "export written");
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedIssue {
    pub record: CredentialRecord,
    pub record_hash: String,
}

/// In-memory log of issued badges, exportable as one batch
#[derive(Debug, Clone, Default)]
pub struct IssuanceLog {
    entries: Vec<LoggedIssue>,
}

impl IssuanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends unless an identical record is already logged. Returns whether
    /// the record was added.
    pub fn record(&mut self, record: &CredentialRecord) -> bool {
        let record_hash = record_fingerprint(record);
        if self.entries.iter().any(|e| e.record_hash == record_hash) {
            debug!(student_id = %record.student_id, "record already logged");
            return false;
        }
        self.entries.push(LoggedIssue {
            record: record.clone(),
            record_hash,
        });
        true
    }

    pub fn entries(&self) -> &[LoggedIssue] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_csv(&self) -> Result<String, ExportError> {
        if self.entries.is_empty() {
            return Err(ExportError::Empty);
        }
        let rows = self.entries.iter().map(|e| {
            let mut row = record_row(&e.record);
            row.push(e.record.encoded_at.format("%Y-%m-%d").to_string());
            row
        });
        write_rows(&BATCH_CSV_HEADER, rows)
    }

    pub fn export(&self, date: NaiveDate) -> Result<ExportedFile, ExportError> {
        Ok(ExportedFile::csv(batch_filename(date), self.to_csv()?))
    }
}
