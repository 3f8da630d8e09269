//! Student Directory - Lookup Boundary
//!
//! The directory is the system of record. Lookups return the record together
//! with its completeness verdict; a miss is a normal outcome, not an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::completeness::CompletenessChecker;
use crate::photo::PhotoAsset;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Directory did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid roster: {0}")]
    InvalidRoster(String),
}

/// Raw profile as held by the directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default = "default_true")]
    pub profile_complete: bool,
}

fn default_true() -> bool { true }

/// Only `photo_asset` changes after lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub course: String,
    #[serde(default)]
    pub photo_asset: Option<PhotoAsset>,
    pub is_complete: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl StudentRecord {
    pub fn from_entry(entry: &DirectoryEntry, checker: &CompletenessChecker) -> Self {
        let report = checker.check(entry);
        Self {
            id: entry.id.clone(),
            student_id: entry.student_id.clone(),
            name: entry.name.clone(),
            email: entry.email.clone().unwrap_or_default(),
            course: entry.course.clone().unwrap_or_default(),
            photo_asset: None,
            is_complete: report.complete,
            missing_fields: report.missing_fields(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "student", rename_all = "snake_case")]
pub enum Lookup {
    Found(StudentRecord),
    NotFound,
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn search(&self, query: &str) -> Result<Lookup, DirectoryError>;
}

/// Directory backed by an in-memory roster
pub struct InMemoryDirectory {
    entries: Vec<DirectoryEntry>,
    checker: CompletenessChecker,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            entries: vec![],
            checker: CompletenessChecker::new(),
        }
    }

    /// Load a JSON array of entries
    pub fn load_from_file(path: &Path) -> Result<Self, DirectoryError> {
        let content = fs::read_to_string(path)
            .map_err(|e| DirectoryError::InvalidRoster(format!("{}: {}", path.display(), e)))?;
        let entries: Vec<DirectoryEntry> = serde_json::from_str(&content)
            .map_err(|e| DirectoryError::InvalidRoster(format!("{}: {}", path.display(), e)))?;

        let mut directory = Self::new();
        for entry in entries {
            directory.register(entry);
        }
        Ok(directory)
    }

    /// Demo roster used by the CLI and the tests.
    pub fn sample() -> Self {
        let rows = [
            ("1", "Jane Smith", "jane.smith@example.edu", "Computer Science", "CS22-1234", true),
            ("2", "John Doe", "john.doe@example.edu", "Mechanical Engineering", "ME22-5678", false),
            ("3", "Sarah Johnson", "sarah.johnson@example.edu", "Computer Science", "CS22-9012", true),
            ("4", "Michael Brown", "michael.brown@example.edu", "Electrical Engineering", "EE22-3456", true),
            ("5", "Emily Davis", "emily.davis@example.edu", "Mechanical Engineering", "ME22-7890", false),
            ("6", "Daniel Wilson", "daniel.wilson@example.edu", "Computer Science", "CS22-3457", true),
            ("7", "Olivia Taylor", "olivia.taylor@example.edu", "Electrical Engineering", "EE22-6789", true),
        ];

        let mut directory = Self::new();
        for (id, name, email, course, student_id, profile_complete) in rows {
            directory.register(DirectoryEntry {
                id: id.to_string(),
                student_id: student_id.to_string(),
                name: name.to_string(),
                email: Some(email.to_string()),
                course: Some(course.to_string()),
                profile_complete,
            });
        }
        directory
    }

    pub fn register(&mut self, entry: DirectoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive substring over name and student ID; first match wins.
    pub fn find(&self, query: &str) -> Lookup {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Lookup::NotFound;
        }

        self.entries
            .iter()
            .find(|e| {
                e.name.to_lowercase().contains(&needle) || e.student_id.to_lowercase().contains(&needle)
            })
            .map(|e| Lookup::Found(StudentRecord::from_entry(e, &self.checker)))
            .unwrap_or(Lookup::NotFound)
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StudentDirectory for InMemoryDirectory {
    async fn search(&self, query: &str) -> Result<Lookup, DirectoryError> {
        Ok(self.find(query))
    }
}
