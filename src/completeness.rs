//! Record Completeness - Rule/Policy Separation
//!
//! Rules produce structured findings.
//! Policy decides whether a record may leave verification.

use serde::{Deserialize, Serialize};
use crate::directory::DirectoryEntry;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    /// Blocks the Verify -> Photo transition
    Blocking,
    /// Shown to the operator, never blocks
    Advisory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletenessFinding {
    pub rule: String,
    pub field: String,
    pub severity: FindingSeverity,
    pub message: String,
}

impl CompletenessFinding {
    fn blocking(rule: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            field: field.to_string(),
            severity: FindingSeverity::Blocking,
            message: message.into(),
        }
    }

    fn advisory(rule: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            field: field.to_string(),
            severity: FindingSeverity::Advisory,
            message: message.into(),
        }
    }
}

/// Outcome of running every rule over one directory entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletenessReport {
    pub complete: bool,
    pub findings: Vec<CompletenessFinding>,
}

impl CompletenessReport {
    /// Field names with at least one blocking finding, deduplicated, in rule order.
    pub fn missing_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = vec![];
        for finding in &self.findings {
            if finding.severity == FindingSeverity::Blocking && !fields.contains(&finding.field) {
                fields.push(finding.field.clone());
            }
        }
        fields
    }
}

pub trait CompletenessRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, entry: &DirectoryEntry) -> Vec<CompletenessFinding>;
}

// --- Concrete Rules ---

pub struct RequiredFieldsRule;

impl CompletenessRule for RequiredFieldsRule {
    fn name(&self) -> &'static str { "required_fields" }

    fn check(&self, entry: &DirectoryEntry) -> Vec<CompletenessFinding> {
        let fields = [
            ("name", Some(entry.name.as_str())),
            ("studentId", Some(entry.student_id.as_str())),
            ("email", entry.email.as_deref()),
            ("course", entry.course.as_deref()),
        ];

        fields
            .iter()
            .filter(|(_, value)| value.map_or(true, |v| v.trim().is_empty()))
            .map(|(field, _)| {
                CompletenessFinding::blocking(self.name(), field, format!("{} is missing", field))
            })
            .collect()
    }
}

pub struct EmailFormatRule;

impl CompletenessRule for EmailFormatRule {
    fn name(&self) -> &'static str { "email_format" }

    fn check(&self, entry: &DirectoryEntry) -> Vec<CompletenessFinding> {
        match entry.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => {
                let valid = email
                    .split_once('@')
                    .map_or(false, |(local, domain)| !local.is_empty() && domain.contains('.'));
                if valid {
                    vec![]
                } else {
                    vec![CompletenessFinding::blocking(
                        self.name(),
                        "email",
                        format!("'{}' is not a valid address", email),
                    )]
                }
            }
            // Absence is reported by RequiredFieldsRule
            _ => vec![],
        }
    }
}

/// The directory's own verdict on the profile.
pub struct ProfileFlagRule;

impl CompletenessRule for ProfileFlagRule {
    fn name(&self) -> &'static str { "profile_flag" }

    fn check(&self, entry: &DirectoryEntry) -> Vec<CompletenessFinding> {
        if entry.profile_complete {
            vec![]
        } else {
            vec![CompletenessFinding::blocking(
                self.name(),
                "profile",
                "directory reports required data fields missing",
            )]
        }
    }
}

pub struct StudentIdFormatRule;

impl CompletenessRule for StudentIdFormatRule {
    fn name(&self) -> &'static str { "student_id_format" }

    fn check(&self, entry: &DirectoryEntry) -> Vec<CompletenessFinding> {
        let id = entry.student_id.trim();
        if id.is_empty() || id.split_once('-').is_some() {
            return vec![];
        }
        vec![CompletenessFinding::advisory(
            self.name(),
            "studentId",
            format!("'{}' does not follow the PROGRAM-NUMBER pattern", id),
        )]
    }
}

/// Runs the rule set and applies the blocking policy
pub struct CompletenessChecker {
    rules: Vec<Box<dyn CompletenessRule>>,
}

impl CompletenessChecker {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(EmailFormatRule),
                Box::new(ProfileFlagRule),
                Box::new(StudentIdFormatRule),
            ],
        }
    }

    pub fn check(&self, entry: &DirectoryEntry) -> CompletenessReport {
        let findings: Vec<_> = self.rules.iter().flat_map(|rule| rule.check(entry)).collect();
        let complete = !findings.iter().any(|f| f.severity == FindingSeverity::Blocking);
        CompletenessReport { complete, findings }
    }
}

impl Default for CompletenessChecker {
    fn default() -> Self {
        Self::new()
    }
}
