use std::sync::Arc;

use gradebookd::ids::LocalId;
use gradebookd::{Aggregator, BuildError, EngineConfig, SnapshotSource};
use serde_json::json;
use tracing::info;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, BuiltGradebook, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Local ids arrive as JSON numbers or numeric strings.
pub fn required_local_id(req: &Request, key: &str) -> Result<LocalId, HandlerErr> {
    let v = req
        .params
        .get(key)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a numeric id", key)))
}

pub fn require_source(state: &AppState) -> Result<Arc<SnapshotSource>, HandlerErr> {
    state
        .source
        .clone()
        .ok_or_else(|| HandlerErr::new("no_source", "open a source snapshot first"))
}

pub fn build_error(course_id: &str, e: BuildError) -> HandlerErr {
    let code = match e {
        BuildError::CourseNotFound(_) => "course_not_found",
        _ => "build_failed",
    };
    HandlerErr::new(code, e.to_string()).with_details(json!({ "courseId": course_id }))
}

pub fn build_and_cache<'a>(
    state: &'a mut AppState,
    course_id: &str,
    config: EngineConfig,
) -> Result<&'a BuiltGradebook, HandlerErr> {
    let source = require_source(state)?;
    let aggregator = Aggregator::new(source, state.ids.clone(), config);
    let (gradebook, report) = state
        .runtime
        .block_on(aggregator.build_with_report(course_id))
        .map_err(|e| build_error(course_id, e))?;
    info!(
        course_id,
        run_id = %report.run_id,
        issues = report.issues.len(),
        "gradebook cached"
    );
    state
        .gradebooks
        .insert(course_id.to_string(), BuiltGradebook { gradebook, report });
    cached(state, course_id)
}

fn cached<'a>(state: &'a AppState, course_id: &str) -> Result<&'a BuiltGradebook, HandlerErr> {
    state.gradebooks.get(course_id).ok_or_else(|| {
        HandlerErr::new("not_found", "gradebook not built")
            .with_details(json!({ "courseId": course_id }))
    })
}

/// Cached gradebook for the course, building it with the session config on first use.
pub fn gradebook_for<'a>(
    state: &'a mut AppState,
    course_id: &str,
) -> Result<&'a BuiltGradebook, HandlerErr> {
    if !state.gradebooks.contains_key(course_id) {
        let config = state.config.clone();
        return build_and_cache(state, course_id, config);
    }
    cached(state, course_id)
}
