mod test_support;

use gradebookd::engine::BuildError;
use gradebookd::model::{CellStatus, Gradebook};
use gradebookd::{Aggregator, EngineConfig, IdAllocator, SnapshotSource};
use std::collections::HashSet;
use std::sync::Arc;
use test_support::fixture_path;

fn aggregator(config: EngineConfig) -> Aggregator<SnapshotSource> {
    let source = SnapshotSource::open(&fixture_path("moodle_snapshot.json")).expect("open snapshot");
    Aggregator::new(Arc::new(source), Arc::new(IdAllocator::new()), config)
}

fn all_ids(gb: &Gradebook) -> Vec<u64> {
    gb.students()
        .iter()
        .map(|s| s.id)
        .chain(gb.assignments().iter().map(|a| a.id))
        .chain(gb.categories().iter().map(|c| c.id))
        .chain(gb.entries().iter().map(|e| e.id))
        .collect()
}

#[tokio::test]
async fn snapshot_course_builds_cross_referenced_gradebook() {
    let (gb, report) = aggregator(EngineConfig::default())
        .build_with_report("42")
        .await
        .expect("build course 42");

    assert_eq!(gb.course_id, "moodle_course_42");
    assert_eq!(gb.course_name, "Intro Biology");
    assert_eq!(gb.source_id, "42");
    assert!(gb.destination_system.is_none());
    assert!(report.issues.is_empty(), "issues: {:?}", report.issues);
    assert_eq!(report.statuses_fetched, 4);

    let roster: Vec<String> = gb
        .students_sorted()
        .into_iter()
        .map(|s| gb.student(s).display_label())
        .collect();
    assert_eq!(roster, vec!["Grace Brewster Hopper", "Ada Lovelace", "Alan Turing"]);

    let names: Vec<&str> = gb.assignments().iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Lab 1", "Essay & Reflection", "Assignment 103"]);
    let max: Vec<f64> = gb.assignments().iter().map(|a| a.max_points).collect();
    assert_eq!(max, vec![10.0, 50.0, 100.0]);

    let labs = gb.category_by_source_id("10").expect("labs");
    let reports = gb.category_by_source_id("11").expect("lab reports");
    let labs_id = gb.category(labs).id.to_string();
    assert_eq!(gb.category(labs).weight_percent, Some(40.0));
    assert_eq!(gb.category(labs).parent_category_id, None);
    assert_eq!(gb.category(reports).parent_category_id.as_deref(), Some(labs_id.as_str()));

    let lab1 = gb.assignment_by_source_id("101").expect("lab 1");
    let essay = gb.assignment_by_source_id("102").expect("essay");
    let a103 = gb.assignment_by_source_id("103").expect("103");
    assert_eq!(gb.assignment(lab1).category_id.as_deref(), Some(labs_id.as_str()));
    assert_eq!(gb.category_name_of(essay), Some("Lab Reports"));
    assert_eq!(gb.assignment(a103).category_id, None);
    assert!(gb.category(labs).assignments.contains(&lab1));
    assert!(gb.assignment(lab1).due_date.is_some());
    assert!(gb.assignment(lab1).cutoff_date.is_some());

    let ada = gb.student_by_source_id("1").expect("ada");
    let grace = gb.student_by_source_id("2").expect("grace");
    let alan = gb.student_by_source_id("3").expect("alan");

    let cell = gb.get_grade(ada, lab1).expect("ada lab 1");
    assert_eq!(cell.grade, "9.00");
    assert_eq!(cell.status(), CellStatus::Graded);
    assert!(!cell.late);

    let cell = gb.get_grade(ada, essay).expect("ada essay");
    assert_eq!(cell.status(), CellStatus::Submitted);
    assert!(cell.late);

    let cell = gb.get_grade(grace, lab1).expect("grace lab 1");
    assert_eq!(cell.status(), CellStatus::Pending);
    assert!(cell.time_submitted.is_none());

    let cell = gb.get_grade(alan, a103).expect("alan 103");
    assert_eq!(cell.feedback.as_deref(), Some("Well argued"));
    assert!(gb.get_grade(grace, essay).is_none());

    assert_eq!(gb.entries().len(), 4);
    assert_eq!(gb.grades_for_student(ada).count(), 2);
    assert_eq!(gb.grades_for_assignment(lab1).count(), 2);

    let ids = all_ids(&gb);
    assert!(ids.iter().all(|id| *id != 0));
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
}

#[tokio::test]
async fn students_without_email_can_be_excluded() {
    let config = EngineConfig {
        exclude_students_without_email: true,
        ..EngineConfig::default()
    };
    let gb = aggregator(config).build_gradebook("42").await.expect("build");
    assert_eq!(gb.students().len(), 2);
    assert!(gb.student_by_source_id("3").is_none());
    assert_eq!(gb.entries().len(), 3);
}

#[tokio::test]
async fn serial_and_parallel_builds_agree() {
    let serial = EngineConfig {
        max_concurrent_students: 1,
        ..EngineConfig::default()
    };
    let a = aggregator(serial).build_gradebook("42").await.expect("serial");
    let b = aggregator(EngineConfig::default()).build_gradebook("42").await.expect("parallel");
    assert_eq!(
        gradebookd::export::to_csv(&a),
        gradebookd::export::to_csv(&b)
    );
}

#[tokio::test]
async fn course_without_roster_builds_empty() {
    let (gb, report) = aggregator(EngineConfig::default())
        .build_with_report("7")
        .await
        .expect("build course 7");
    assert_eq!(gb.course_name, "ART");
    assert!(gb.students().is_empty());
    assert!(gb.assignments().is_empty());
    assert!(report.issues.is_empty());
}

#[tokio::test]
async fn unknown_course_is_fatal() {
    let err = aggregator(EngineConfig::default())
        .build_gradebook("404")
        .await
        .expect_err("missing course");
    assert!(matches!(err, BuildError::CourseNotFound(ref id) if id == "404"));
}

#[tokio::test]
async fn shared_allocator_keeps_ids_unique_across_builds() {
    let source = Arc::new(
        SnapshotSource::open(&fixture_path("moodle_snapshot.json")).expect("open snapshot"),
    );
    let ids = Arc::new(IdAllocator::new());
    let agg = Aggregator::new(source, ids, EngineConfig::default());
    let first = agg.build_gradebook("42").await.expect("first");
    let second = agg.build_gradebook("42").await.expect("second");

    let a: HashSet<u64> = all_ids(&first).into_iter().collect();
    let b: HashSet<u64> = all_ids(&second).into_iter().collect();
    assert!(a.is_disjoint(&b));
}
