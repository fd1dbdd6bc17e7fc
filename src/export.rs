use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::model::{AssignmentRef, Gradebook, StudentRef};

const MANIFEST_ENTRY: &str = "manifest.json";
const GRADEBOOK_ENTRY: &str = "gradebook.json";
const GRADES_ENTRY: &str = "grades.csv";
pub const BUNDLE_FORMAT_V1: &str = "gradebook-export-v1";

/// Shown in the grid for a student/assignment pair without a cell.
pub const MISSING_GRADE: &str = "-";

pub const CSV_HEADER: &str = "student_id,username,family_name,given_name,assignment_id,assignment_name,category,max_points,grade,status,late";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn grid(gb: &Gradebook) -> Grid {
    let assignments: Vec<AssignmentRef> = gb.assignment_refs().collect();
    let mut header = Vec::with_capacity(assignments.len() + 1);
    header.push("Student".to_string());
    header.extend(assignments.iter().map(|a| gb.assignment(*a).name.clone()));

    let rows = gb
        .students_sorted()
        .into_iter()
        .map(|s| {
            let mut row = Vec::with_capacity(assignments.len() + 1);
            row.push(gb.student(s).display_label());
            for a in &assignments {
                row.push(
                    gb.get_grade(s, *a)
                        .map(|c| c.grade.clone())
                        .unwrap_or_else(|| MISSING_GRADE.to_string()),
                );
            }
            row
        })
        .collect();

    Grid { header, rows }
}

fn student_grades_json(gb: &Gradebook, student: StudentRef) -> serde_json::Value {
    let grades: Vec<serde_json::Value> = gb
        .assignment_refs()
        .filter_map(|a| gb.get_grade(student, a).map(|c| (a, c)))
        .map(|(a, c)| {
            json!({
                "cellId": c.id,
                "assignmentId": gb.assignment(a).id,
                "assignmentName": gb.assignment(a).name,
                "grade": c.grade,
                "status": c.status().as_str(),
                "submitted": c.submitted,
                "graded": c.graded,
                "late": c.late,
                "feedback": c.feedback,
                "timeSubmitted": c.time_submitted,
                "timeGraded": c.time_graded,
            })
        })
        .collect();
    json!(grades)
}

/// Full document for one course. Absent optional fields are left out.
pub fn to_json(gb: &Gradebook) -> anyhow::Result<serde_json::Value> {
    let mut students = Vec::with_capacity(gb.students().len());
    for s in gb.students_sorted() {
        let mut v = serde_json::to_value(gb.student(s)).context("failed to serialize student")?;
        v["fullName"] = json!(gb.student(s).full_name());
        v["grades"] = student_grades_json(gb, s);
        students.push(v);
    }

    let mut assignments = Vec::with_capacity(gb.assignments().len());
    for a in gb.assignment_refs() {
        let mut v =
            serde_json::to_value(gb.assignment(a)).context("failed to serialize assignment")?;
        v["categoryName"] = json!(gb.category_name_of(a));
        assignments.push(v);
    }

    let mut categories = Vec::with_capacity(gb.categories().len());
    for c in gb.category_refs() {
        let cat = gb.category(c);
        let mut v = serde_json::to_value(cat).context("failed to serialize category")?;
        v["assignmentIds"] = json!(cat
            .assignments
            .iter()
            .map(|a| gb.assignment(*a).id)
            .collect::<Vec<_>>());
        categories.push(v);
    }

    let mut doc = json!({
        "courseId": gb.course_id,
        "courseName": gb.course_name,
        "sourceSystem": gb.source_system,
        "sourceId": gb.source_id,
        "destinationSystem": gb.destination_system,
        "destinationId": gb.destination_id,
        "students": students,
        "assignments": assignments,
        "categories": categories,
        "gradeCount": gb.entries().len(),
    });
    strip_nulls(&mut doc);
    Ok(doc)
}

fn strip_nulls(v: &mut serde_json::Value) {
    match v {
        serde_json::Value::Object(map) => {
            map.retain(|_, child| !child.is_null());
            for child in map.values_mut() {
                strip_nulls(child);
            }
        }
        serde_json::Value::Array(items) => {
            for child in items.iter_mut() {
                strip_nulls(child);
            }
        }
        _ => {}
    }
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// One row per existing cell, students in roster order.
pub fn to_csv(gb: &Gradebook) -> String {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push('\n');

    for s in gb.students_sorted() {
        let student = gb.student(s);
        for a in gb.assignment_refs() {
            let Some(cell) = gb.get_grade(s, a) else {
                continue;
            };
            let assignment = gb.assignment(a);
            let fields = [
                student.id.to_string(),
                student.username.clone(),
                student.family_name.clone(),
                student.given_name.clone(),
                assignment.id.to_string(),
                assignment.name.clone(),
                gb.category_name_of(a).unwrap_or("").to_string(),
                crate::mapper::format_grade(assignment.max_points),
                cell.grade.clone(),
                cell.status().as_str().to_string(),
                cell.late.to_string(),
            ];
            let line = fields
                .iter()
                .map(|f| csv_quote(f))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

pub fn summary_text(gb: &Gradebook) -> String {
    let mut out = String::new();
    out.push_str(&format!("Gradebook: {} ({})\n", gb.course_name, gb.course_id));
    out.push_str(&format!(
        "Students: {}, Assignments: {}, Categories: {}, Grades: {}\n",
        gb.students().len(),
        gb.assignments().len(),
        gb.categories().len(),
        gb.entries().len()
    ));
    for s in gb.students_sorted() {
        out.push_str(&format!("\n{}\n", gb.student(s).display_label()));
        for a in gb.assignment_refs() {
            let name = &gb.assignment(a).name;
            match gb.get_grade(s, a) {
                Some(cell) => {
                    let mark = if cell.submitted { "✓" } else { "✗" };
                    let grade = if cell.grade.is_empty() { MISSING_GRADE } else { &cell.grade };
                    out.push_str(&format!("  {name}: {grade} {mark}\n"));
                }
                None => out.push_str(&format!("  {name}: {MISSING_GRADE} ✗\n")),
            }
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    pub name: String,
    pub bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub entries: Vec<BundleEntry>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn write_text_file(out_path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(out_path, contents)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))
}

/// Writes `gradebook.json` and `grades.csv` plus a manifest holding each
/// entry's SHA-256. The manifest is written last.
pub fn write_bundle(gb: &Gradebook, out_path: &Path) -> anyhow::Result<BundleSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let doc = to_json(gb)?;
    let payloads: Vec<(&str, Vec<u8>)> = vec![
        (
            GRADEBOOK_ENTRY,
            serde_json::to_vec_pretty(&doc).context("failed to serialize gradebook")?,
        ),
        (GRADES_ENTRY, to_csv(gb).into_bytes()),
    ];

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(payloads.len());
    for (name, bytes) in &payloads {
        zip.start_file(*name, opts)
            .with_context(|| format!("failed to start {name} entry"))?;
        zip.write_all(bytes)
            .with_context(|| format!("failed to write {name} entry"))?;
        entries.push(BundleEntry {
            name: name.to_string(),
            bytes: bytes.len(),
            sha256: sha256_hex(bytes),
        });
    }

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "courseId": gb.course_id,
        "entries": entries,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(BundleSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: entries.len() + 1,
        entries,
    })
}
