use crate::ipc::error::ok;
use crate::ipc::helpers::{
    build_and_cache, gradebook_for, required_local_id, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, BuiltGradebook, Request};
use gradebookd::config::EngineConfigOverride;
use gradebookd::export;
use gradebookd::model::{GradeCell, Gradebook};
use serde_json::json;

fn cell_json(gb: &Gradebook, cell: &GradeCell) -> serde_json::Value {
    let student = gb.student(cell.student);
    let assignment = gb.assignment(cell.assignment);
    json!({
        "id": cell.id,
        "studentId": student.id,
        "studentName": student.display_label(),
        "assignmentId": assignment.id,
        "assignmentName": assignment.name,
        "grade": cell.grade,
        "status": cell.status().as_str(),
        "submitted": cell.submitted,
        "graded": cell.graded,
        "late": cell.late,
        "feedback": cell.feedback,
        "timeSubmitted": cell.time_submitted,
        "timeGraded": cell.time_graded,
    })
}

fn overview_json(course_id: &str, built: &BuiltGradebook) -> serde_json::Value {
    let gb = &built.gradebook;
    json!({
        "courseId": course_id,
        "gradebookId": gb.course_id,
        "courseName": gb.course_name,
        "sourceSystem": gb.source_system,
        "students": gb.students().len(),
        "assignments": gb.assignments().len(),
        "categories": gb.categories().len(),
        "grades": gb.entries().len(),
        "report": built.report,
    })
}

fn handle_build(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let config = match req.params.get("config") {
        None | Some(serde_json::Value::Null) => state.config.clone(),
        Some(v) => {
            let o: EngineConfigOverride = serde_json::from_value(v.clone())
                .map_err(|e| HandlerErr::new("bad_params", format!("invalid config: {}", e)))?;
            state.config.with_override(&o)
        }
    };
    let built = build_and_cache(state, &course_id, config)?;
    Ok(overview_json(&course_id, built))
}

fn handle_summary(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let built = gradebook_for(state, &course_id)?;
    let mut v = overview_json(&course_id, built);
    v["text"] = json!(export::summary_text(&built.gradebook));
    Ok(v)
}

fn handle_grid(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let built = gradebook_for(state, &course_id)?;
    Ok(json!(export::grid(&built.gradebook)))
}

fn handle_grade(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let student_id = required_local_id(req, "studentId")?;
    let assignment_id = required_local_id(req, "assignmentId")?;
    let gb = &gradebook_for(state, &course_id)?.gradebook;

    let student = gb.find_student(student_id).ok_or_else(|| {
        HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id }))
    })?;
    let assignment = gb.find_assignment(assignment_id).ok_or_else(|| {
        HandlerErr::new("not_found", "assignment not found")
            .with_details(json!({ "assignmentId": assignment_id }))
    })?;
    let cell = gb.get_grade(student, assignment).map(|c| cell_json(gb, c));
    Ok(json!({ "cell": cell }))
}

fn handle_student_grades(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let student_id = required_local_id(req, "studentId")?;
    let gb = &gradebook_for(state, &course_id)?.gradebook;

    let student = gb.find_student(student_id).ok_or_else(|| {
        HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id }))
    })?;
    let cells: Vec<serde_json::Value> = gb
        .grades_for_student(student)
        .map(|c| cell_json(gb, c))
        .collect();
    Ok(json!({ "studentId": student_id, "cells": cells }))
}

fn handle_assignment_grades(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(req, "courseId")?;
    let assignment_id = required_local_id(req, "assignmentId")?;
    let gb = &gradebook_for(state, &course_id)?.gradebook;

    let assignment = gb.find_assignment(assignment_id).ok_or_else(|| {
        HandlerErr::new("not_found", "assignment not found")
            .with_details(json!({ "assignmentId": assignment_id }))
    })?;
    let cells: Vec<serde_json::Value> = gb
        .grades_for_assignment(assignment)
        .map(|c| cell_json(gb, c))
        .collect();
    Ok(json!({ "assignmentId": assignment_id, "cells": cells }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "gradebook.build" => handle_build(state, req),
        "gradebook.summary" => handle_summary(state, req),
        "gradebook.grid" => handle_grid(state, req),
        "gradebook.grade" => handle_grade(state, req),
        "gradebook.studentGrades" => handle_student_grades(state, req),
        "gradebook.assignmentGrades" => handle_assignment_grades(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
