//! Badge Preview
//!
//! The preview is informational: it shows what will be printed and never
//! blocks the workflow.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::directory::StudentRecord;
use crate::photo::CapturedPhoto;

/// What the operator reviews before printing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BadgePreview {
    pub student_id: String,
    pub name: String,
    pub course: String,
    /// `None` when the photo step was skipped
    pub photo_data_url: Option<String>,
    pub valid_until_year: i32,
}

impl BadgePreview {
    pub fn build(
        student: &StudentRecord,
        photo: Option<&CapturedPhoto>,
        issued_on: impl Datelike,
        validity_years: u32,
    ) -> Self {
        Self {
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            course: student.course.clone(),
            photo_data_url: photo.map(|p| p.asset.data_url.clone()),
            valid_until_year: issued_on.year() + validity_years as i32,
        }
    }

    pub fn has_photo(&self) -> bool {
        self.photo_data_url.is_some()
    }

    /// Footer line printed under the photo
    pub fn validity_line(&self) -> String {
        format!("Valid until {}", self.valid_until_year)
    }
}
