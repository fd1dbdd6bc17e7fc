use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DEFAULT_SOURCE_SYSTEM;
use crate::source::{
    unix_to_utc, GradeSource, GradingState, RawGradeItem, SourceCourse, SourceError,
    SourceGradeItem, SourceStatus, SourceStudent, SubmissionState,
};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Ids arrive as numbers or strings depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(i64),
    Str(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Num(n) => n.to_string(),
            RawId::Str(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubmission {
    assignment_id: RawId,
    user_id: RawId,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    grading_status: Option<String>,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    time_submitted: Option<i64>,
    #[serde(default)]
    time_graded: Option<i64>,
    #[serde(default)]
    due_date: Option<i64>,
    #[serde(default)]
    cutoff_date: Option<i64>,
}

impl RawSubmission {
    fn into_status(self) -> SourceStatus {
        SourceStatus {
            assignment_id: self.assignment_id.into_string(),
            user_id: self.user_id.into_string(),
            submission_state: SubmissionState::parse(self.status.as_deref()),
            grading_state: GradingState::parse(self.grading_status.as_deref()),
            grade: self.grade,
            feedback: self.feedback,
            time_submitted: unix_to_utc(self.time_submitted),
            time_graded: unix_to_utc(self.time_graded),
            due_date: unix_to_utc(self.due_date),
            cutoff_date: unix_to_utc(self.cutoff_date),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SnapshotFile {
    source_system: Option<String>,
    courses: Vec<SourceCourse>,
    students: HashMap<String, Vec<SourceStudent>>,
    grade_items: HashMap<String, Vec<RawGradeItem>>,
    assignment_ids: HashMap<String, Vec<RawId>>,
    submissions: Vec<RawSubmission>,
}

#[derive(Debug, Default)]
pub struct SnapshotSource {
    system: String,
    courses: Vec<SourceCourse>,
    students: HashMap<String, Vec<SourceStudent>>,
    grade_items: HashMap<String, Vec<SourceGradeItem>>,
    assignment_ids: HashMap<String, Vec<String>>,
    /// Keyed by (assignment id, user id).
    submissions: HashMap<(String, String), SourceStatus>,
}

impl SnapshotSource {
    pub fn open(path: &Path) -> Result<Self, SnapshotError> {
        let text = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = Self::from_json_str(&text)?;
        info!(
            path = %path.display(),
            courses = snapshot.courses.len(),
            submissions = snapshot.submissions.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SnapshotError> {
        let file: SnapshotFile = serde_json::from_str(text)?;

        let grade_items = file
            .grade_items
            .into_iter()
            .map(|(course, raw)| {
                let total = raw.len();
                let items: Vec<SourceGradeItem> =
                    raw.into_iter().filter_map(SourceGradeItem::from_raw).collect();
                if items.len() != total {
                    debug!(course = %course, skipped = total - items.len(), "unsupported grade item types skipped");
                }
                (course, items)
            })
            .collect();

        let assignment_ids = file
            .assignment_ids
            .into_iter()
            .map(|(course, ids)| (course, ids.into_iter().map(RawId::into_string).collect()))
            .collect();

        // A later record for the same pair replaces the earlier one.
        let submissions = file
            .submissions
            .into_iter()
            .map(|raw| {
                let status = raw.into_status();
                ((status.assignment_id.clone(), status.user_id.clone()), status)
            })
            .collect();

        Ok(Self {
            system: file
                .source_system
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE_SYSTEM.to_string()),
            courses: file.courses,
            students: file.students,
            grade_items,
            assignment_ids,
            submissions,
        })
    }

    pub fn course_count(&self) -> usize {
        self.courses.len()
    }
}

#[async_trait]
impl GradeSource for SnapshotSource {
    fn system_name(&self) -> &str {
        &self.system
    }

    async fn list_courses(&self) -> Result<Vec<SourceCourse>, SourceError> {
        let mut courses = self.courses.clone();
        courses.sort_by(|a, b| a.display_name().cmp(b.display_name()));
        Ok(courses)
    }

    async fn course_detail(&self, course_id: &str) -> Result<Option<SourceCourse>, SourceError> {
        Ok(self.courses.iter().find(|c| c.id == course_id).cloned())
    }

    async fn enrolled_students(&self, course_id: &str) -> Result<Vec<SourceStudent>, SourceError> {
        Ok(self.students.get(course_id).cloned().unwrap_or_default())
    }

    async fn grade_items(&self, course_id: &str) -> Result<Vec<SourceGradeItem>, SourceError> {
        Ok(self.grade_items.get(course_id).cloned().unwrap_or_default())
    }

    async fn assignment_ids(&self, course_id: &str) -> Result<Vec<String>, SourceError> {
        Ok(self.assignment_ids.get(course_id).cloned().unwrap_or_default())
    }

    async fn submission_status(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<Option<SourceStatus>, SourceError> {
        Ok(self
            .submissions
            .get(&(assignment_id.to_string(), student_id.to_string()))
            .cloned())
    }
}
