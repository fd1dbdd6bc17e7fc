use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::ids::IdAllocator;
use crate::mapper;
use crate::model::{
    Assignment, AssignmentRef, CategoryRef, GradeCell, Gradebook, ModelError, StudentRef,
    DEFAULT_MAX_POINTS,
};
use crate::source::{GradeSource, ModuleItem, SourceError, SourceGradeItem, SourceStatus};

/// Activity plugin whose instance ids are assignment ids.
const ASSIGN_MODULE: &str = "assign";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("course {0} not found")]
    CourseNotFound(String),
    #[error("could not fetch course {course_id}: {source}")]
    CourseFetch {
        course_id: String,
        #[source]
        source: SourceError,
    },
    #[error("gradebook invariant violated: {0}")]
    Invariant(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Roster,
    GradeItems,
    AssignmentIds,
    SubmissionStatus,
    UnmatchedStatus,
}

/// A unit of data the build had to go without.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildIssue {
    pub kind: IssueKind,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub run_id: String,
    pub statuses_fetched: usize,
    pub issues: Vec<BuildIssue>,
}

impl BuildReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id: run_id.to_string(),
            statuses_fetched: 0,
            issues: Vec::new(),
        }
    }

    fn record(&mut self, kind: IssueKind, subject: impl Into<String>, message: impl Into<String>) {
        self.issues.push(BuildIssue {
            kind,
            subject: subject.into(),
            message: message.into(),
        });
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }
}

/// Everything one student's worker brings back. Cells are only built from
/// this once the worker has gathered all of its statuses.
struct StudentStatuses {
    student: StudentRef,
    statuses: Vec<SourceStatus>,
    issues: Vec<BuildIssue>,
}

pub struct Aggregator<S> {
    source: Arc<S>,
    ids: Arc<IdAllocator>,
    config: EngineConfig,
}

impl<S: GradeSource> Aggregator<S> {
    pub fn new(source: Arc<S>, ids: Arc<IdAllocator>, config: EngineConfig) -> Self {
        Self { source, ids, config }
    }

    pub async fn build_gradebook(&self, course_id: &str) -> Result<Gradebook, BuildError> {
        self.build_with_report(course_id).await.map(|(gb, _)| gb)
    }

    pub async fn build_with_report(
        &self,
        course_id: &str,
    ) -> Result<(Gradebook, BuildReport), BuildError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("build_gradebook", course_id, %run_id);
        self.build_inner(course_id, run_id).instrument(span).await
    }

    async fn build_inner(
        &self,
        course_id: &str,
        run_id: Uuid,
    ) -> Result<(Gradebook, BuildReport), BuildError> {
        let mut report = BuildReport::new(run_id);
        let system = self
            .config
            .source_system
            .as_deref()
            .unwrap_or_else(|| self.source.system_name());

        let course = self
            .call("course_detail", self.source.course_detail(course_id))
            .await
            .map_err(|source| BuildError::CourseFetch {
                course_id: course_id.to_string(),
                source,
            })?
            .ok_or_else(|| BuildError::CourseNotFound(course_id.to_string()))?;

        let mut gradebook = Gradebook::new(
            format!("{}_course_{}", system.to_ascii_lowercase(), course.id),
            course.display_name(),
        );
        gradebook.source_system = system.to_string();
        gradebook.source_id = course.id.clone();
        info!(course_name = %gradebook.course_name, "building gradebook");

        // Roster
        let roster = match self
            .call("enrolled_students", self.source.enrolled_students(course_id))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "roster unavailable, continuing without students");
                report.record(IssueKind::Roster, course_id, e.to_string());
                Vec::new()
            }
        };
        let roster: Vec<_> = if self.config.exclude_students_without_email {
            roster
                .into_iter()
                .filter(|s| s.email.as_deref().is_some_and(|e| !e.trim().is_empty()))
                .collect()
        } else {
            roster
        };
        for student in mapper::to_student_list(&roster, system) {
            gradebook.add_student(student);
        }

        // Grade items: categories come straight from here, modules only feed
        // names and limits to the assignment list below.
        let items = match self.call("grade_items", self.source.grade_items(course_id)).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "grade items unavailable, continuing without categories");
                report.record(IssueKind::GradeItems, course_id, e.to_string());
                Vec::new()
            }
        };
        let mut parent_links: Vec<(CategoryRef, String)> = Vec::new();
        for mut category in mapper::to_category_list(&items, system) {
            let raw_parent = category.parent_category_id.take();
            let r = gradebook.add_category(category);
            if let Some(parent) = raw_parent {
                parent_links.push((r, parent));
            }
        }

        // Assignments: one per assignment id, not per grade item.
        let assignment_ids = match self
            .call("assignment_ids", self.source.assignment_ids(course_id))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "assignment list unavailable, continuing without assignments");
                report.record(IssueKind::AssignmentIds, course_id, e.to_string());
                Vec::new()
            }
        };
        let mut category_links: Vec<(AssignmentRef, CategoryRef)> = Vec::new();
        for aid in assignment_ids.iter().map(|a| a.trim()).filter(|a| !a.is_empty()).unique() {
            let item = find_assign_item(&items, aid);
            let category = item
                .and_then(|gi| gi.category_id.as_deref())
                .and_then(|cid| gradebook.category_by_source_id(cid));

            let mut assignment = Assignment {
                name: item
                    .and_then(|gi| gi.name.as_deref())
                    .map(mapper::clean_html)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("Assignment {aid}")),
                source_system: Some(system.to_string()),
                source_system_id: Some(aid.to_string()),
                ..Assignment::default()
            };
            assignment.set_max_points(item.and_then(|gi| gi.grade_max).unwrap_or(DEFAULT_MAX_POINTS));
            if item.is_none() {
                debug!(assignment_id = aid, "no grade item for assignment");
            }

            let r = gradebook.add_assignment(assignment);
            if let Some(c) = category {
                category_links.push((r, c));
            }
        }

        // Categories must carry their final ids before anything points at them.
        let assigned = gradebook.ensure_unique_ids(&self.ids);
        debug!(assigned, "surrogate ids assigned");
        for (assignment, category) in category_links {
            gradebook.link_category(assignment, category)?;
        }
        for (child, parent_source_id) in parent_links {
            match gradebook.category_by_source_id(&parent_source_id) {
                Some(parent) if parent != child => gradebook.set_parent_category(child, parent)?,
                _ => debug!(parent = %parent_source_id, "parent category not in this course"),
            }
        }

        // Submission statuses, fanned out per student.
        let source_assignment_ids: Vec<String> = gradebook
            .assignments()
            .iter()
            .filter_map(|a| a.source_system_id.clone())
            .collect();
        let jobs: Vec<(StudentRef, String)> = gradebook
            .student_refs()
            .filter_map(|r| {
                gradebook
                    .student(r)
                    .source_system_id
                    .clone()
                    .map(|sid| (r, sid))
            })
            .collect();

        let limit = self.config.max_concurrent_students.max(1);
        let gathered: Vec<StudentStatuses> = stream::iter(jobs)
            .map(|(student, sid)| self.fetch_student_statuses(student, sid, &source_assignment_ids))
            .buffer_unordered(limit)
            .collect()
            .await;

        for batch in gathered {
            report.issues.extend(batch.issues);
            report.statuses_fetched += batch.statuses.len();
            for status in batch.statuses {
                let Some(assignment) = gradebook.assignment_by_source_id(&status.assignment_id)
                else {
                    warn!(
                        assignment_id = %status.assignment_id,
                        user_id = %status.user_id,
                        "status for unknown assignment dropped"
                    );
                    report.record(
                        IssueKind::UnmatchedStatus,
                        format!("{}/{}", status.assignment_id, status.user_id),
                        "no assignment with this source id",
                    );
                    continue;
                };
                gradebook.fill_assignment_dates(assignment, status.due_date, status.cutoff_date);
                let cell = GradeCell::new(
                    batch.student,
                    assignment,
                    mapper::status_to_cell_data(&status),
                );
                gradebook.add_grade(cell, &self.ids)?;
            }
        }

        info!(
            students = gradebook.students().len(),
            assignments = gradebook.assignments().len(),
            categories = gradebook.categories().len(),
            entries = gradebook.entries().len(),
            issues = report.issues.len(),
            "gradebook built"
        );
        Ok((gradebook, report))
    }

    /// All statuses for one student, fetched one assignment at a time.
    async fn fetch_student_statuses(
        &self,
        student: StudentRef,
        student_id: String,
        assignment_ids: &[String],
    ) -> StudentStatuses {
        let mut out = StudentStatuses {
            student,
            statuses: Vec::new(),
            issues: Vec::new(),
        };
        for aid in assignment_ids {
            match self
                .call("submission_status", self.source.submission_status(aid, &student_id))
                .await
            {
                Ok(Some(status)) => out.statuses.push(status),
                Ok(None) => {}
                Err(e) => {
                    warn!(assignment_id = %aid, user_id = %student_id, error = %e, "submission status unavailable");
                    out.issues.push(BuildIssue {
                        kind: IssueKind::SubmissionStatus,
                        subject: format!("{aid}/{student_id}"),
                        message: e.to_string(),
                    });
                }
            }
        }
        debug!(user_id = %student_id, count = out.statuses.len(), "statuses gathered");
        out
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout { operation }),
        }
    }
}

fn find_assign_item<'a>(items: &'a [SourceGradeItem], assignment_id: &str) -> Option<&'a ModuleItem> {
    items.iter().find_map(|i| match i {
        SourceGradeItem::Module(m)
            if m.module.as_deref() == Some(ASSIGN_MODULE)
                && m.instance_id.as_deref() == Some(assignment_id) =>
        {
            Some(m)
        }
        _ => None,
    })
}
