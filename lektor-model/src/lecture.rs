use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::LectureId;

/// Metadata scraped from a lecture's portal page.
///
/// Everything except the id is optional: the portal's info box is
/// hand-maintained and individual fields go missing regularly. Consumers
/// persist what is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureMetadata {
    pub title: Option<String>,
    pub series_id: Option<u32>,
    pub series_name: Option<String>,
    pub lecturer_ids: Vec<u32>,
    pub lecturer_names: Vec<String>,
    pub date: Option<NaiveDate>,
    /// Language as printed on the page (`English`, `German`, ...).
    pub language: Option<String>,
    /// Duration as printed on the page, e.g. `01:28:03`.
    pub duration: Option<String>,
}

/// Semester label for a lecture date: winter terms span November through
/// February, everything else is a summer term.
pub fn semester_for(date: NaiveDate) -> String {
    if date.month() < 3 || date.month() > 10 {
        format!("WT {}/{}", date.year() - 1, date.year())
    } else {
        format!("ST {}", date.year())
    }
}

/// A finished speech-to-text run for one lecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub id: LectureId,
    /// ISO 639-1 code detected by the recognizer.
    pub language: String,
    pub vtt_path: PathBuf,
    pub txt_path: PathBuf,
}
