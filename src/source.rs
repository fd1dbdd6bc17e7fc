use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {operation} timed out")]
    Timeout { operation: &'static str },
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
    #[error("malformed {operation} response: {message}")]
    Malformed {
        operation: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceCourse {
    pub id: String,
    pub short_name: String,
    pub full_name: String,
    pub category: String,
    pub summary: String,
    pub visible: bool,
}

impl SourceCourse {
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.short_name
        } else {
            &self.full_name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceStudent {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
}

/// Grade item payload exactly as the gradebook report returns it. Every kind of
/// item rides this one shape; `SourceGradeItem::from_raw` splits it by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawGradeItem {
    pub id: i64,
    pub itemname: Option<String>,
    pub itemtype: String,
    pub itemmodule: Option<String>,
    pub iteminstance: Option<i64>,
    pub categoryid: Option<i64>,
    pub grademax: Option<f64>,
    pub grademin: Option<f64>,
    pub gradeformatted: Option<String>,
    pub graderaw: Option<f64>,
    pub feedback: Option<String>,
    pub weightformatted: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryItem {
    pub id: String,
    pub name: Option<String>,
    /// Source id of the enclosing category, if nested.
    pub parent_id: Option<String>,
    pub weight_formatted: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleItem {
    pub id: String,
    pub name: Option<String>,
    /// Activity plugin name, e.g. `assign` or `quiz`.
    pub module: Option<String>,
    /// Id of the activity instance; for `assign` modules this is the assignment id.
    pub instance_id: Option<String>,
    pub category_id: Option<String>,
    pub grade_max: Option<f64>,
    pub grade_min: Option<f64>,
    pub grade_formatted: Option<String>,
    pub grade_raw: Option<f64>,
    pub feedback: Option<String>,
    pub weight_formatted: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseTotalItem {
    pub id: String,
    pub name: Option<String>,
    pub grade_max: Option<f64>,
    pub grade_formatted: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceGradeItem {
    Category(CategoryItem),
    Module(ModuleItem),
    CourseTotal(CourseTotalItem),
}

impl SourceGradeItem {
    /// Returns `None` for item types the gradebook has no use for (e.g. manual items
    /// the source reports under an unknown type).
    pub fn from_raw(raw: RawGradeItem) -> Option<Self> {
        let id = raw.id.to_string();
        match raw.itemtype.trim().to_ascii_lowercase().as_str() {
            "category" => Some(Self::Category(CategoryItem {
                id,
                name: raw.itemname,
                parent_id: raw.categoryid.map(|v| v.to_string()),
                weight_formatted: raw.weightformatted,
                hidden: raw.hidden,
            })),
            "mod" => Some(Self::Module(ModuleItem {
                id,
                name: raw.itemname,
                module: raw.itemmodule,
                instance_id: raw.iteminstance.map(|v| v.to_string()),
                category_id: raw.categoryid.map(|v| v.to_string()),
                grade_max: raw.grademax,
                grade_min: raw.grademin,
                grade_formatted: raw.gradeformatted,
                grade_raw: raw.graderaw,
                feedback: raw.feedback,
                weight_formatted: raw.weightformatted,
                hidden: raw.hidden,
            })),
            "course" => Some(Self::CourseTotal(CourseTotalItem {
                id,
                name: raw.itemname,
                grade_max: raw.grademax,
                grade_formatted: raw.gradeformatted,
                hidden: raw.hidden,
            })),
            _ => None,
        }
    }

    /// The item's own id in the source system.
    pub fn source_id(&self) -> &str {
        match self {
            Self::Category(c) => &c.id,
            Self::Module(m) => &m.id,
            Self::CourseTotal(t) => &t.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    NotSubmitted,
    Draft,
    Submitted,
    Reopened,
}

impl SubmissionState {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("draft") => Self::Draft,
            Some("submitted") => Self::Submitted,
            Some("reopened") => Self::Reopened,
            _ => Self::NotSubmitted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingState {
    Graded,
    NotGraded,
}

impl GradingState {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("graded") => Self::Graded,
            _ => Self::NotGraded,
        }
    }
}

/// One student's submission and grading status for one assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    pub assignment_id: String,
    pub user_id: String,
    pub submission_state: SubmissionState,
    pub grading_state: GradingState,
    pub grade: Option<String>,
    pub feedback: Option<String>,
    pub time_submitted: Option<DateTime<Utc>>,
    pub time_graded: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub cutoff_date: Option<DateTime<Utc>>,
}

impl SourceStatus {
    pub fn is_submitted(&self) -> bool {
        self.submission_state == SubmissionState::Submitted
    }

    pub fn is_graded(&self) -> bool {
        self.grading_state == GradingState::Graded
    }

    /// Known only when both the due date and the submission time are.
    pub fn is_late(&self) -> Option<bool> {
        match (self.time_submitted, self.due_date) {
            (Some(submitted), Some(due)) => Some(submitted > due),
            _ => None,
        }
    }
}

/// Unix seconds to UTC. Zero and negative stamps mean "not set".
pub fn unix_to_utc(secs: Option<i64>) -> Option<DateTime<Utc>> {
    let secs = secs.filter(|s| *s > 0)?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Collectors for one source system. Implementations own transport and decoding;
/// the engine only sees typed records.
#[async_trait]
pub trait GradeSource: Send + Sync {
    /// Name recorded as `source_system` on every entity built from this source.
    fn system_name(&self) -> &str;

    async fn list_courses(&self) -> Result<Vec<SourceCourse>, SourceError>;

    async fn course_detail(&self, course_id: &str) -> Result<Option<SourceCourse>, SourceError>;

    async fn enrolled_students(&self, course_id: &str) -> Result<Vec<SourceStudent>, SourceError>;

    async fn grade_items(&self, course_id: &str) -> Result<Vec<SourceGradeItem>, SourceError>;

    async fn assignment_ids(&self, course_id: &str) -> Result<Vec<String>, SourceError>;

    async fn submission_status(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<Option<SourceStatus>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_items_split_by_kind() {
        let raw: Vec<RawGradeItem> = serde_json::from_value(json!([
            { "id": 1, "itemname": "Labs", "itemtype": "category", "weightformatted": "40.00 %", "categoryid": 9 },
            { "id": 2, "itemname": "Lab 1", "itemtype": "mod", "itemmodule": "assign", "iteminstance": 11, "categoryid": 1, "grademax": 10.0 },
            { "id": 3, "itemname": null, "itemtype": "course", "grademax": 100.0 },
            { "id": 4, "itemname": "Bonus", "itemtype": "manual" }
        ]))
        .expect("raw items");

        let items: Vec<SourceGradeItem> =
            raw.into_iter().filter_map(SourceGradeItem::from_raw).collect();
        assert_eq!(items.len(), 3);

        match &items[0] {
            SourceGradeItem::Category(c) => {
                assert_eq!(c.id, "1");
                assert_eq!(c.parent_id.as_deref(), Some("9"));
                assert_eq!(c.weight_formatted.as_deref(), Some("40.00 %"));
            }
            other => panic!("expected category, got {other:?}"),
        }
        match &items[1] {
            SourceGradeItem::Module(m) => {
                assert_eq!(m.instance_id.as_deref(), Some("11"));
                assert_eq!(m.category_id.as_deref(), Some("1"));
                assert_eq!(m.grade_max, Some(10.0));
            }
            other => panic!("expected module, got {other:?}"),
        }
        assert!(matches!(items[2], SourceGradeItem::CourseTotal(_)));
        assert_eq!(items[2].source_id(), "3");
    }

    #[test]
    fn submission_states_normalize() {
        assert_eq!(SubmissionState::parse(Some("new")), SubmissionState::NotSubmitted);
        assert_eq!(SubmissionState::parse(None), SubmissionState::NotSubmitted);
        assert_eq!(SubmissionState::parse(Some("Submitted")), SubmissionState::Submitted);
        assert_eq!(SubmissionState::parse(Some("draft")), SubmissionState::Draft);
        assert_eq!(SubmissionState::parse(Some("reopened")), SubmissionState::Reopened);
        assert_eq!(GradingState::parse(Some("graded")), GradingState::Graded);
        assert_eq!(GradingState::parse(Some("notgraded")), GradingState::NotGraded);
    }

    #[test]
    fn late_requires_both_dates() {
        let mut status = SourceStatus {
            assignment_id: "11".to_string(),
            user_id: "7".to_string(),
            submission_state: SubmissionState::Submitted,
            grading_state: GradingState::NotGraded,
            grade: None,
            feedback: None,
            time_submitted: unix_to_utc(Some(2_000)),
            time_graded: None,
            due_date: None,
            cutoff_date: None,
        };
        assert_eq!(status.is_late(), None);
        status.due_date = unix_to_utc(Some(1_000));
        assert_eq!(status.is_late(), Some(true));
        status.due_date = unix_to_utc(Some(3_000));
        assert_eq!(status.is_late(), Some(false));
    }

    #[test]
    fn non_positive_stamps_are_unset() {
        assert_eq!(unix_to_utc(Some(0)), None);
        assert_eq!(unix_to_utc(Some(-5)), None);
        assert_eq!(unix_to_utc(None), None);
        assert!(unix_to_utc(Some(1_700_000_000)).is_some());
    }

    #[test]
    fn course_display_name_falls_back_to_short_name() {
        let course = SourceCourse {
            short_name: "BIO101".to_string(),
            ..SourceCourse::default()
        };
        assert_eq!(course.display_name(), "BIO101");
    }
}
