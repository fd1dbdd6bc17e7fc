use crate::ipc::error::ok;
use crate::ipc::helpers::{require_source, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use gradebookd::{GradeSource, SnapshotSource};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "sourcePath": state.source_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            "cachedCourses": state.gradebooks.len(),
            "maxConcurrentStudents": state.config.max_concurrent_students,
        }),
    )
}

fn handle_source_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(required_str(req, "path")?);
    let source = SnapshotSource::open(&path).map_err(|e| {
        HandlerErr::new("bad_params", e.to_string())
            .with_details(json!({ "path": path.to_string_lossy() }))
    })?;
    let course_count = source.course_count();
    let system = source.system_name().to_string();

    // Gradebooks built from the previous source no longer apply.
    let dropped = state.gradebooks.len();
    state.gradebooks.clear();
    state.source = Some(Arc::new(source));
    state.source_path = Some(path.clone());
    info!(path = %path.display(), course_count, dropped, "source opened");

    Ok(json!({
        "sourcePath": path.to_string_lossy(),
        "sourceSystem": system,
        "courseCount": course_count,
    }))
}

fn handle_courses_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let source = require_source(state)?;
    let courses = state
        .runtime
        .block_on(source.list_courses())
        .map_err(|e| HandlerErr::new("build_failed", e.to_string()))?;
    let rows: Vec<serde_json::Value> = courses
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.display_name(),
                "shortName": c.short_name,
                "category": c.category,
                "visible": c.visible,
                "built": state.gradebooks.contains_key(&c.id),
            })
        })
        .collect();
    Ok(json!({ "courses": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => return Some(handle_health(state, req)),
        "source.open" => handle_source_open(state, req),
        "courses.list" => handle_courses_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
