use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::ids::{IdAllocator, LocalId, UNASSIGNED};

/// Stamped on every handle a gradebook issues.
type BookToken = u128;

/// Handle to a student owned by a `Gradebook`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StudentRef {
    #[serde(skip)]
    book: BookToken,
    slot: usize,
}

/// Handle to an assignment owned by a `Gradebook`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AssignmentRef {
    #[serde(skip)]
    book: BookToken,
    slot: usize,
}

/// Handle to a category owned by a `Gradebook`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CategoryRef {
    #[serde(skip)]
    book: BookToken,
    slot: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("grade cell references student slot {0} which this gradebook does not own")]
    UnknownStudent(usize),
    #[error("grade cell references assignment slot {0} which this gradebook does not own")]
    UnknownAssignment(usize),
    #[error("category slot {0} is not owned by this gradebook")]
    UnknownCategory(usize),
    #[error("category slot {0} has no surrogate id yet; run ensure_unique_ids first")]
    UnassignedCategory(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: LocalId,
    pub name: String,
    pub source_system: Option<String>,
    pub source_system_id: Option<String>,
    pub destination_system: Option<String>,
    pub destination_system_id: Option<String>,
    pub username: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
}

impl Student {
    /// Non-empty name parts joined by a single space.
    pub fn full_name(&self) -> String {
        [self.given_name.trim(), self.family_name.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn display_label(&self) -> String {
        let full = self.full_name();
        if !full.is_empty() {
            return full;
        }
        if !self.name.trim().is_empty() {
            return self.name.trim().to_string();
        }
        self.username.clone()
    }
}

pub const DEFAULT_MAX_POINTS: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: LocalId,
    pub name: String,
    pub source_system: Option<String>,
    pub source_system_id: Option<String>,
    pub destination_system: Option<String>,
    pub destination_system_id: Option<String>,
    pub description: Option<String>,
    /// Surrogate id of the owning category, as a string. `None` when uncategorized.
    pub category_id: Option<String>,
    pub max_points: f64,
    pub due_date: Option<DateTime<Utc>>,
    pub cutoff_date: Option<DateTime<Utc>>,
}

impl Default for Assignment {
    fn default() -> Self {
        Self {
            id: UNASSIGNED,
            name: String::new(),
            source_system: None,
            source_system_id: None,
            destination_system: None,
            destination_system_id: None,
            description: None,
            category_id: None,
            max_points: DEFAULT_MAX_POINTS,
            due_date: None,
            cutoff_date: None,
        }
    }
}

impl Assignment {
    /// Negative or non-finite maxima are treated as 0.
    pub fn set_max_points(&mut self, max_points: f64) {
        self.max_points = if max_points.is_finite() && max_points > 0.0 {
            max_points
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: LocalId,
    pub name: String,
    pub source_system: Option<String>,
    pub source_system_id: Option<String>,
    pub destination_system: Option<String>,
    pub destination_system_id: Option<String>,
    pub weight_percent: Option<f64>,
    pub parent_category_id: Option<String>,
    /// Grouped view only. The canonical link is `Assignment::category_id`.
    #[serde(skip)]
    pub assignments: Vec<AssignmentRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellStatus {
    Graded,
    Submitted,
    Pending,
}

impl CellStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CellStatus::Graded => "Graded",
            CellStatus::Submitted => "Submitted",
            CellStatus::Pending => "Pending",
        }
    }
}

/// Grade payload of a cell, without the student/assignment it belongs to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellData {
    pub grade: String,
    pub submitted: bool,
    pub graded: bool,
    pub late: bool,
    pub feedback: Option<String>,
    pub time_submitted: Option<DateTime<Utc>>,
    pub time_graded: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCell {
    pub id: LocalId,
    pub student: StudentRef,
    pub assignment: AssignmentRef,
    pub grade: String,
    pub submitted: bool,
    pub graded: bool,
    pub late: bool,
    pub feedback: Option<String>,
    pub time_submitted: Option<DateTime<Utc>>,
    pub time_graded: Option<DateTime<Utc>>,
}

impl GradeCell {
    pub fn new(student: StudentRef, assignment: AssignmentRef, data: CellData) -> Self {
        let CellData {
            grade,
            submitted,
            graded,
            late,
            feedback,
            time_submitted,
            time_graded,
        } = data;
        Self {
            id: UNASSIGNED,
            student,
            assignment,
            grade,
            submitted,
            graded,
            late,
            feedback,
            time_submitted,
            time_graded,
        }
    }

    pub fn status(&self) -> CellStatus {
        if self.graded {
            CellStatus::Graded
        } else if self.submitted {
            CellStatus::Submitted
        } else {
            CellStatus::Pending
        }
    }
}

/// Aggregate root. Owns every student, assignment, category and cell it holds;
/// cells point at students and assignments by handle into this gradebook only.
#[derive(Debug, Clone)]
pub struct Gradebook {
    pub course_id: String,
    pub course_name: String,
    pub source_system: String,
    pub source_id: String,
    pub destination_system: Option<String>,
    pub destination_id: Option<String>,
    book: BookToken,
    students: Vec<Student>,
    assignments: Vec<Assignment>,
    categories: Vec<Category>,
    entries: Vec<GradeCell>,
    /// (student, assignment) to position in `entries`.
    cell_index: HashMap<(StudentRef, AssignmentRef), usize>,
}

impl Default for Gradebook {
    fn default() -> Self {
        Self {
            course_id: String::new(),
            course_name: String::new(),
            source_system: String::new(),
            source_id: String::new(),
            destination_system: None,
            destination_id: None,
            book: Uuid::new_v4().as_u128(),
            students: Vec::new(),
            assignments: Vec::new(),
            categories: Vec::new(),
            entries: Vec::new(),
            cell_index: HashMap::new(),
        }
    }
}

impl Gradebook {
    pub fn new(course_id: impl Into<String>, course_name: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            course_name: course_name.into(),
            ..Self::default()
        }
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn entries(&self) -> &[GradeCell] {
        &self.entries
    }

    fn student_ref(&self, slot: usize) -> StudentRef {
        StudentRef { book: self.book, slot }
    }

    fn assignment_ref(&self, slot: usize) -> AssignmentRef {
        AssignmentRef { book: self.book, slot }
    }

    fn category_ref(&self, slot: usize) -> CategoryRef {
        CategoryRef { book: self.book, slot }
    }

    fn owns_student(&self, r: StudentRef) -> bool {
        r.book == self.book && r.slot < self.students.len()
    }

    fn owns_assignment(&self, r: AssignmentRef) -> bool {
        r.book == self.book && r.slot < self.assignments.len()
    }

    fn owns_category(&self, r: CategoryRef) -> bool {
        r.book == self.book && r.slot < self.categories.len()
    }

    pub fn student_refs(&self) -> impl Iterator<Item = StudentRef> {
        let book = self.book;
        (0..self.students.len()).map(move |slot| StudentRef { book, slot })
    }

    pub fn assignment_refs(&self) -> impl Iterator<Item = AssignmentRef> {
        let book = self.book;
        (0..self.assignments.len()).map(move |slot| AssignmentRef { book, slot })
    }

    pub fn category_refs(&self) -> impl Iterator<Item = CategoryRef> {
        let book = self.book;
        (0..self.categories.len()).map(move |slot| CategoryRef { book, slot })
    }

    /// Panics if the handle was issued by another gradebook.
    pub fn student(&self, r: StudentRef) -> &Student {
        assert!(r.book == self.book, "student handle from another gradebook");
        &self.students[r.slot]
    }

    /// Panics if the handle was issued by another gradebook.
    pub fn assignment(&self, r: AssignmentRef) -> &Assignment {
        assert!(r.book == self.book, "assignment handle from another gradebook");
        &self.assignments[r.slot]
    }

    /// Panics if the handle was issued by another gradebook.
    pub fn category(&self, r: CategoryRef) -> &Category {
        assert!(r.book == self.book, "category handle from another gradebook");
        &self.categories[r.slot]
    }

    pub fn add_student(&mut self, student: Student) -> StudentRef {
        self.students.push(student);
        self.student_ref(self.students.len() - 1)
    }

    pub fn add_assignment(&mut self, assignment: Assignment) -> AssignmentRef {
        self.assignments.push(assignment);
        self.assignment_ref(self.assignments.len() - 1)
    }

    pub fn add_category(&mut self, category: Category) -> CategoryRef {
        self.categories.push(category);
        self.category_ref(self.categories.len() - 1)
    }

    /// Fills due/cutoff dates that are still unknown. Dates already present win.
    pub fn fill_assignment_dates(
        &mut self,
        r: AssignmentRef,
        due: Option<DateTime<Utc>>,
        cutoff: Option<DateTime<Utc>>,
    ) {
        if !self.owns_assignment(r) {
            return;
        }
        let a = &mut self.assignments[r.slot];
        if a.due_date.is_none() {
            a.due_date = due;
        }
        if a.cutoff_date.is_none() {
            a.cutoff_date = cutoff;
        }
    }

    /// Inserts a cell, replacing any existing cell for the same pair.
    pub fn add_grade(&mut self, mut cell: GradeCell, ids: &IdAllocator) -> Result<(), ModelError> {
        if !self.owns_student(cell.student) {
            return Err(ModelError::UnknownStudent(cell.student.slot));
        }
        if !self.owns_assignment(cell.assignment) {
            return Err(ModelError::UnknownAssignment(cell.assignment.slot));
        }

        if cell.id == UNASSIGNED {
            cell.id = ids.next_id();
        }
        let key = (cell.student, cell.assignment);
        match self.cell_index.get(&key) {
            Some(&pos) => self.entries[pos] = cell,
            None => {
                self.cell_index.insert(key, self.entries.len());
                self.entries.push(cell);
            }
        }
        Ok(())
    }

    pub fn link_category(
        &mut self,
        assignment: AssignmentRef,
        category: CategoryRef,
    ) -> Result<(), ModelError> {
        if !self.owns_assignment(assignment) {
            return Err(ModelError::UnknownAssignment(assignment.slot));
        }
        let cat_id = self.assigned_category_id(category)?;

        self.assignments[assignment.slot].category_id = Some(cat_id.to_string());
        let grouped = &mut self.categories[category.slot].assignments;
        if !grouped.contains(&assignment) {
            grouped.push(assignment);
        }
        Ok(())
    }

    pub fn set_parent_category(
        &mut self,
        child: CategoryRef,
        parent: CategoryRef,
    ) -> Result<(), ModelError> {
        if !self.owns_category(child) {
            return Err(ModelError::UnknownCategory(child.slot));
        }
        let parent_id = self.assigned_category_id(parent)?;
        self.categories[child.slot].parent_category_id = Some(parent_id.to_string());
        Ok(())
    }

    fn assigned_category_id(&self, r: CategoryRef) -> Result<LocalId, ModelError> {
        if !self.owns_category(r) {
            return Err(ModelError::UnknownCategory(r.slot));
        }
        let id = self.categories[r.slot].id;
        if id == UNASSIGNED {
            return Err(ModelError::UnassignedCategory(r.slot));
        }
        Ok(id)
    }

    /// Gives a fresh id to every entity still carrying `UNASSIGNED`. Existing ids
    /// are left alone, so a second call is a no-op.
    pub fn ensure_unique_ids(&mut self, ids: &IdAllocator) -> usize {
        let mut assigned = 0usize;
        let mut give = |id: &mut LocalId| {
            if *id == UNASSIGNED {
                *id = ids.next_id();
                assigned += 1;
            }
        };
        self.students.iter_mut().for_each(|s| give(&mut s.id));
        self.assignments.iter_mut().for_each(|a| give(&mut a.id));
        self.categories.iter_mut().for_each(|c| give(&mut c.id));
        self.entries.iter_mut().for_each(|g| give(&mut g.id));
        assigned
    }

    pub fn get_grade(&self, student: StudentRef, assignment: AssignmentRef) -> Option<&GradeCell> {
        self.cell_index
            .get(&(student, assignment))
            .map(|&pos| &self.entries[pos])
    }

    pub fn grades_for_student(&self, student: StudentRef) -> impl Iterator<Item = &GradeCell> {
        self.entries.iter().filter(move |c| c.student == student)
    }

    pub fn grades_for_assignment(
        &self,
        assignment: AssignmentRef,
    ) -> impl Iterator<Item = &GradeCell> {
        self.entries.iter().filter(move |c| c.assignment == assignment)
    }

    pub fn find_student(&self, id: LocalId) -> Option<StudentRef> {
        self.students
            .iter()
            .position(|s| s.id == id)
            .map(|slot| self.student_ref(slot))
    }

    pub fn find_assignment(&self, id: LocalId) -> Option<AssignmentRef> {
        self.assignments
            .iter()
            .position(|a| a.id == id)
            .map(|slot| self.assignment_ref(slot))
    }

    pub fn student_by_source_id(&self, source_id: &str) -> Option<StudentRef> {
        self.students
            .iter()
            .position(|s| s.source_system_id.as_deref() == Some(source_id))
            .map(|slot| self.student_ref(slot))
    }

    pub fn assignment_by_source_id(&self, source_id: &str) -> Option<AssignmentRef> {
        self.assignments
            .iter()
            .position(|a| a.source_system_id.as_deref() == Some(source_id))
            .map(|slot| self.assignment_ref(slot))
    }

    pub fn category_by_source_id(&self, source_id: &str) -> Option<CategoryRef> {
        self.categories
            .iter()
            .position(|c| c.source_system_id.as_deref() == Some(source_id))
            .map(|slot| self.category_ref(slot))
    }

    /// Category name for an assignment, resolved through its `category_id`.
    pub fn category_name_of(&self, assignment: AssignmentRef) -> Option<&str> {
        let cat_id = self.assignment(assignment).category_id.as_deref()?;
        self.categories
            .iter()
            .find(|c| c.id.to_string() == cat_id)
            .map(|c| c.name.as_str())
    }

    /// Roster order: family name, then given name, then username.
    pub fn students_sorted(&self) -> Vec<StudentRef> {
        let mut refs: Vec<StudentRef> = self.student_refs().collect();
        refs.sort_by(|a, b| {
            let sa = self.student(*a);
            let sb = self.student(*b);
            sa.family_name
                .to_lowercase()
                .cmp(&sb.family_name.to_lowercase())
                .then_with(|| sa.given_name.to_lowercase().cmp(&sb.given_name.to_lowercase()))
                .then_with(|| sa.username.cmp(&sb.username))
        });
        refs
    }
}
