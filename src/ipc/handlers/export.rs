use crate::ipc::error::ok;
use crate::ipc::helpers::{gradebook_for, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use gradebookd::export;
use serde_json::json;
use std::path::PathBuf;

fn export_failed(path: &str, e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("export_failed", format!("{e:#}")).with_details(json!({ "path": path }))
}

fn handle_export_json(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let out_path = required_str(req, "outPath")?;
    let gb = &gradebook_for(state, &course_id)?.gradebook;

    let text = export::to_json(gb)
        .and_then(|doc| Ok(serde_json::to_string_pretty(&doc)?))
        .map_err(|e| export_failed(&out_path, e))?;
    export::write_text_file(&PathBuf::from(&out_path), &text)
        .map_err(|e| export_failed(&out_path, e))?;
    Ok(json!({ "path": out_path, "bytes": text.len() }))
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let out_path = required_str(req, "outPath")?;
    let gb = &gradebook_for(state, &course_id)?.gradebook;

    let csv = export::to_csv(gb);
    export::write_text_file(&PathBuf::from(&out_path), &csv)
        .map_err(|e| export_failed(&out_path, e))?;
    Ok(json!({
        "path": out_path,
        "rowsExported": csv.lines().count().saturating_sub(1),
    }))
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let out_path = required_str(req, "outPath")?;
    let gb = &gradebook_for(state, &course_id)?.gradebook;

    let summary = export::write_bundle(gb, &PathBuf::from(&out_path))
        .map_err(|e| export_failed(&out_path, e))?;
    Ok(json!({
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "entries": summary.entries,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "gradebook.exportJson" => handle_export_json(state, req),
        "gradebook.exportCsv" => handle_export_csv(state, req),
        "gradebook.exportBundle" => handle_export_bundle(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
