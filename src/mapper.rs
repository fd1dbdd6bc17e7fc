use itertools::Itertools;
use regex::Regex;
use std::sync::OnceLock;

use crate::ids::UNASSIGNED;
use crate::model::{Assignment, Category, CellData, Student};
use crate::source::{CategoryItem, ModuleItem, SourceGradeItem, SourceStatus, SourceStudent};

pub const UNNAMED_ITEM: &str = "(Unnamed Item)";
pub const UNNAMED_CATEGORY: &str = "(Unnamed Category)";

fn tag_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static tag pattern"))
}

/// Strips markup the source wraps around formatted values and decodes the
/// common entities. Empty and whitespace-only input yields an empty string.
pub fn clean_html(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }
    let no_tags = tag_regex().replace_all(input, "");
    no_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn non_empty_clean(input: Option<&str>) -> Option<String> {
    let cleaned = clean_html(input?);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// All words but the last form the given name; the last word is the family name.
pub fn split_full_name(full_name: Option<&str>) -> (String, String) {
    let parts: Vec<&str> = full_name.unwrap_or("").split_whitespace().collect();
    match parts.as_slice() {
        [] => (String::new(), String::new()),
        [only] => (only.to_string(), String::new()),
        [given @ .., family] => (given.join(" "), family.to_string()),
    }
}

/// `"25%"` → 25.0, `"12.5 %"` → 12.5; unparsable or outside 0..=100 → `None`.
pub fn parse_weight(formatted: Option<&str>) -> Option<f64> {
    let cleaned = clean_html(formatted?);
    let number = cleaned.trim_end_matches('%').trim();
    if number.is_empty() {
        return None;
    }
    number
        .parse::<f64>()
        .ok()
        .filter(|w| (0.0..=100.0).contains(w))
}

/// At most two decimals, trailing zeros dropped: 85.0 → "85", 85.456 → "85.46".
pub fn format_grade(value: f64) -> String {
    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn to_student(source: &SourceStudent, system: &str) -> Student {
    let mut given = source.given_name.clone().unwrap_or_default();
    let mut family = source.family_name.clone().unwrap_or_default();
    if given.trim().is_empty() && family.trim().is_empty() {
        (given, family) = split_full_name(source.full_name.as_deref());
    }

    let name = match source.full_name.as_deref().map(str::trim) {
        Some(full) if !full.is_empty() => full.to_string(),
        _ => format!("{given} {family}").trim().to_string(),
    };

    Student {
        id: UNASSIGNED,
        name,
        source_system: Some(system.to_string()),
        source_system_id: Some(source.id.clone()),
        destination_system: None,
        destination_system_id: None,
        username: source.username.clone(),
        email: source.email.clone().unwrap_or_default(),
        given_name: given.trim().to_string(),
        family_name: family.trim().to_string(),
    }
}

/// Item-only view of an activity. `max_points` falls back to 0 here; the
/// aggregation engine applies its own default when it builds assignments.
pub fn to_assignment(item: &ModuleItem, system: &str) -> Assignment {
    let mut assignment = Assignment {
        id: UNASSIGNED,
        name: non_empty_clean(item.name.as_deref()).unwrap_or_else(|| UNNAMED_ITEM.to_string()),
        source_system: Some(system.to_string()),
        source_system_id: Some(item.id.clone()),
        description: non_empty_clean(item.feedback.as_deref()),
        category_id: item.category_id.clone(),
        ..Assignment::default()
    };
    assignment.set_max_points(item.grade_max.unwrap_or(0.0));
    assignment
}

pub fn to_category(item: &CategoryItem, system: &str) -> Category {
    Category {
        id: UNASSIGNED,
        name: non_empty_clean(item.name.as_deref()).unwrap_or_else(|| UNNAMED_CATEGORY.to_string()),
        source_system: Some(system.to_string()),
        source_system_id: Some(item.id.clone()),
        destination_system: None,
        destination_system_id: None,
        weight_percent: parse_weight(item.weight_formatted.as_deref()),
        parent_category_id: item.parent_id.clone(),
        assignments: Vec::new(),
    }
}

/// Grade payload carried on an activity item itself, for views that have no
/// per-student submission record.
pub fn to_cell_data(item: &ModuleItem) -> CellData {
    let grade = non_empty_clean(item.grade_formatted.as_deref())
        .or_else(|| item.grade_raw.map(format_grade))
        .unwrap_or_default();
    CellData {
        grade,
        submitted: false,
        graded: item.grade_raw.is_some(),
        late: false,
        feedback: non_empty_clean(item.feedback.as_deref()),
        time_submitted: None,
        time_graded: None,
    }
}

/// Grade payload from a submission status record.
pub fn status_to_cell_data(status: &SourceStatus) -> CellData {
    CellData {
        grade: status
            .grade
            .as_deref()
            .map(clean_html)
            .unwrap_or_default(),
        submitted: status.is_submitted(),
        graded: status.is_graded(),
        late: status.is_late().unwrap_or(false),
        feedback: non_empty_clean(status.feedback.as_deref()),
        time_submitted: status.time_submitted,
        time_graded: status.time_graded,
    }
}

fn modules(items: &[SourceGradeItem]) -> impl Iterator<Item = &ModuleItem> {
    items.iter().filter_map(|i| match i {
        SourceGradeItem::Module(m) => Some(m),
        _ => None,
    })
}

pub fn to_student_list(students: &[SourceStudent], system: &str) -> Vec<Student> {
    students
        .iter()
        .unique_by(|s| s.id.as_str())
        .map(|s| to_student(s, system))
        .collect()
}

pub fn to_assignment_list(items: &[SourceGradeItem], system: &str) -> Vec<Assignment> {
    modules(items)
        .unique_by(|m| m.id.as_str())
        .map(|m| to_assignment(m, system))
        .collect()
}

pub fn to_category_list(items: &[SourceGradeItem], system: &str) -> Vec<Category> {
    items
        .iter()
        .filter_map(|i| match i {
            SourceGradeItem::Category(c) => Some(c),
            _ => None,
        })
        .unique_by(|c| c.id.as_str())
        .map(|c| to_category(c, system))
        .collect()
}

pub fn to_cell_data_list(items: &[SourceGradeItem]) -> Vec<CellData> {
    modules(items)
        .unique_by(|m| m.id.as_str())
        .map(to_cell_data)
        .collect()
}
