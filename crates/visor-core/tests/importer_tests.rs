use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::tempdir;

use visor_core::importer::find_result_documents;
use visor_core::sampler::VideoInfo;
use visor_core::storage::Database;
use visor_core::{ImportMode, Progress, ProgressReporter, ResultImporter, SilentReporter};

fn write_doc(root: &Path, relative: &str, body: &Value) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, serde_json::to_string_pretty(body).unwrap()).unwrap();
    path
}

fn count(db: &Database, table: &str) -> i64 {
    db.connection()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

fn import(db: &Database, root: &Path) -> visor_core::ImportStats {
    ResultImporter::default()
        .import_directory(db, root, &SilentReporter)
        .unwrap()
}

#[test]
fn test_short_companion_arrays_become_null() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "clip/clip_frame_0000_00m00s_analysis.json",
        &json!({
            "violations": ["No hard hat", "Worker near edge", "Blocked exit"],
            "severity": ["High"],
            "locations": ["north", "east"],
            "image_path": "frames/clip/clip_frame_0000_00m00s.jpg",
            "timestamp": "2024-01-01T00:00:00Z"
        }),
    );

    let db = Database::open_in_memory().unwrap();
    let stats = import(&db, dir.path());
    assert_eq!(stats.violations, 3);

    let rows: Vec<(Option<String>, Option<String>, Option<String>)> = db
        .connection()
        .prepare("SELECT severity, location, recommendation FROM violations ORDER BY id")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        rows,
        vec![
            (Some("high".to_string()), Some("north".to_string()), None),
            (None, Some("east".to_string()), None),
            (None, None, None),
        ]
    );
}

#[test]
fn test_violation_types_inferred() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "clip/clip_frame_0000_00m00s_analysis.json",
        &json!({
            "violations": [
                "Scaffolding: missing guardrail",
                "equipment fall hazard",
                "Worker missing hard hat",
                "Wet floor"
            ]
        }),
    );

    let db = Database::open_in_memory().unwrap();
    import(&db, dir.path());

    let types: Vec<(String, String)> = db
        .connection()
        .prepare("SELECT violation_type, description FROM violations ORDER BY id")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(types[0], ("Scaffolding".to_string(), "Scaffolding: missing guardrail".to_string()));
    assert_eq!(types[1].0, "Dangerous Position");
    assert_eq!(types[2].0, "Missing PPE");
    assert_eq!(types[3].0, "Other Hazard");
}

#[test]
fn test_same_video_name_creates_one_video() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "clip/clip_frame_0000_00m00s_analysis.json", &json!({"violations": []}));
    write_doc(dir.path(), "clip/clip_frame_0001_00m05s_analysis.json", &json!({"violations": []}));
    write_doc(dir.path(), "yard/yard_frame_0000_00m00s_analysis.json", &json!({"violations": []}));

    let db = Database::open_in_memory().unwrap();
    let stats = import(&db, dir.path());

    assert_eq!(stats.videos_created, 2);
    assert_eq!(count(&db, "videos"), 2);
    assert_eq!(count(&db, "frames"), 3);

    let (frame_number, timestamp): (i64, i64) = db
        .connection()
        .query_row(
            "SELECT f.frame_number, f.timestamp_seconds FROM frames f \
             JOIN videos v ON f.video_id = v.id \
             WHERE v.video_name = 'clip' ORDER BY f.frame_number DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!((frame_number, timestamp), (1, 5));
}

#[test]
fn test_out_of_range_worker_reference_is_skipped() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "clip/clip_frame_0000_00m00s_analysis.json",
        &json!({
            "violations": ["No hard hat", "No vest"],
            "worker_identifiers": [
                {"worker_id": "w1", "features": "red vest", "violations": [5]}
            ]
        }),
    );

    let db = Database::open_in_memory().unwrap();
    let stats = import(&db, dir.path());
    assert_eq!(stats.imported, 1);
    assert_eq!(count(&db, "worker_identifiers"), 1);
    assert_eq!(count(&db, "worker_violations"), 0);
}

#[test]
fn test_worker_references_resolve_by_position() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "clip/clip_frame_0000_00m00s_analysis.json",
        &json!({"violations": ["earlier frame violation"]}),
    );
    write_doc(
        dir.path(),
        "clip/clip_frame_0001_00m05s_analysis.json",
        &json!({
            "violations": ["No hard hat", "No vest", "Blocked exit"],
            "worker_identifiers": [
                {"worker_id": "w1", "features": "red vest", "violations": [0, "2", -1, "x", 7]},
                {"worker_id": "w2", "features": "blue shirt"}
            ]
        }),
    );

    let db = Database::open_in_memory().unwrap();
    let stats = import(&db, dir.path());
    assert_eq!(stats.worker_identifiers, 2);
    assert_eq!(stats.worker_links, 2);

    let linked: Vec<String> = db
        .connection()
        .prepare(
            "SELECT v.description FROM worker_violations wv \
             JOIN violations v ON wv.violation_id = v.id \
             JOIN worker_identifiers w ON wv.worker_identifier_id = w.id \
             WHERE w.worker_id = 'w1' ORDER BY wv.id",
        )
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(linked, vec!["No hard hat".to_string(), "Blocked exit".to_string()]);

    // Every link stays inside its worker's frame.
    let crossed: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM worker_violations wv \
             JOIN violations v ON wv.violation_id = v.id \
             JOIN worker_identifiers w ON wv.worker_identifier_id = w.id \
             WHERE v.frame_id != w.frame_id",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(crossed, 0);
}

#[test]
fn test_query_answers_keep_order() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "clip/clip_frame_0000_00m00s_analysis.json",
        &json!({
            "violations": [],
            "query_answers": [
                {"question": "Is the crane running?", "answer": "Yes", "confidence": "HIGH"},
                {"question": "Any vehicles?", "answer": "No", "confidence": ""},
                "not an object"
            ]
        }),
    );

    let db = Database::open_in_memory().unwrap();
    let stats = import(&db, dir.path());
    assert_eq!(stats.query_answers, 2);

    let answers: Vec<(String, Option<String>)> = db
        .connection()
        .prepare("SELECT question, confidence FROM query_answers ORDER BY id")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        answers,
        vec![
            ("Is the crane running?".to_string(), Some("high".to_string())),
            ("Any vehicles?".to_string(), None),
        ]
    );
}

#[test]
fn test_malformed_documents_are_skipped() {
    let dir = tempdir().unwrap();
    let bad = dir.path().join("clip/clip_frame_0000_00m00s_analysis.json");
    fs::create_dir_all(bad.parent().unwrap()).unwrap();
    fs::write(&bad, "{ not json").unwrap();
    write_doc(dir.path(), "clip/clip_frame_0001_00m05s_analysis.json", &json!([1, 2, 3]));
    write_doc(
        dir.path(),
        "clip/clip_frame_0002_00m10s_analysis.json",
        &json!({"violations": ["No hard hat"]}),
    );

    let db = Database::open_in_memory().unwrap();
    let stats = import(&db, dir.path());

    assert_eq!(stats.documents_found, 3);
    assert_eq!(stats.skipped_malformed, 2);
    assert_eq!(stats.imported, 1);
    // Malformed documents leave no orphan video rows behind.
    assert_eq!(count(&db, "videos"), 1);
    assert_eq!(count(&db, "frames"), 1);
}

#[test]
fn test_error_document_still_creates_frame() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "clip/clip_frame_0000_00m00s_analysis.json",
        &json!({
            "error": "JSON parse error: expected value",
            "raw_response": "I cannot help with that",
            "image_path": "frames/clip/clip_frame_0000_00m00s.jpg",
            "timestamp": "2024-01-01T00:00:00Z"
        }),
    );

    let db = Database::open_in_memory().unwrap();
    let stats = import(&db, dir.path());
    assert_eq!(stats.failed_analyses, 1);
    assert_eq!(stats.frames, 1);
    assert_eq!(count(&db, "violations"), 0);

    let image_path: String = db
        .connection()
        .query_row("SELECT image_path FROM frames", [], |row| row.get(0))
        .unwrap();
    assert_eq!(image_path, "frames/clip/clip_frame_0000_00m00s.jpg");
}

#[test]
fn test_unparseable_filename_uses_directory_name() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "loading_dock/snapshot_analysis.json",
        &json!({"violations": ["Pallets block the exit"], "worker_count": "3"}),
    );

    let db = Database::open_in_memory().unwrap();
    import(&db, dir.path());

    let row: (String, i64, i64, Option<i64>) = db
        .connection()
        .query_row(
            "SELECT v.video_name, f.frame_number, f.timestamp_seconds, f.worker_count \
             FROM frames f JOIN videos v ON f.video_id = v.id",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(row, ("loading_dock".to_string(), 0, 0, Some(3)));
}

#[test]
fn test_reimport_modes() {
    let dir = tempdir().unwrap();
    write_doc(
        dir.path(),
        "clip/clip_frame_0000_00m00s_analysis.json",
        &json!({"violations": ["No hard hat"], "image_path": "frames/clip/a.jpg"}),
    );
    write_doc(
        dir.path(),
        "clip/clip_frame_0001_00m05s_analysis.json",
        &json!({"violations": [], "image_path": "frames/clip/b.jpg"}),
    );

    let db = Database::open_in_memory().unwrap();
    import(&db, dir.path());
    import(&db, dir.path());
    assert_eq!(count(&db, "videos"), 2, "append duplicates across calls");
    assert_eq!(count(&db, "frames"), 4);

    db.truncate_all().unwrap();
    let importer = ResultImporter::new(ImportMode::SkipExisting);
    importer.import_directory(&db, dir.path(), &SilentReporter).unwrap();
    let second = importer.import_directory(&db, dir.path(), &SilentReporter).unwrap();
    assert_eq!(second.skipped_existing, 2);
    assert_eq!(second.imported, 0);
    assert_eq!(count(&db, "videos"), 1);
    assert_eq!(count(&db, "frames"), 2);

    write_doc(
        dir.path(),
        "clip/clip_frame_0002_00m10s_analysis.json",
        &json!({"violations": [], "image_path": "frames/clip/c.jpg"}),
    );
    let third = importer.import_directory(&db, dir.path(), &SilentReporter).unwrap();
    assert_eq!(third.imported, 1);
    assert_eq!(third.videos_created, 0, "existing video is reused");
    assert_eq!(count(&db, "videos"), 1);
}

#[test]
fn test_video_info_attached_on_creation() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "clip/clip_frame_0000_00m00s_analysis.json", &json!({"violations": []}));

    let db = Database::open_in_memory().unwrap();
    let info = VideoInfo {
        path: PathBuf::from("uploads/clip.mp4"),
        fps: 30.0,
        frame_count: 300,
        duration_secs: 10.0,
    };
    ResultImporter::new(ImportMode::Append)
        .with_video_info([("clip".to_string(), info)])
        .import_directory(&db, dir.path(), &SilentReporter)
        .unwrap();

    let videos = db.list_videos().unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].filepath.as_deref(), Some("uploads/clip.mp4"));
    assert_eq!(videos[0].duration_seconds, Some(10.0));
    assert_eq!(videos[0].frame_count, Some(300));
}

#[test]
fn test_missing_results_dir_is_an_error() {
    let dir = tempdir().unwrap();
    let db = Database::open_in_memory().unwrap();
    let result = ResultImporter::default().import_directory(
        &db,
        &dir.path().join("nope"),
        &SilentReporter,
    );
    assert!(result.is_err());
}

#[test]
fn test_find_result_documents_is_sorted_and_filtered() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "b/b_frame_0000_00m00s_analysis.json", &json!({}));
    write_doc(dir.path(), "a/a_frame_0000_00m00s_analysis.json", &json!({}));
    fs::write(dir.path().join("notes.json"), "{}").unwrap();

    let files = find_result_documents(dir.path());
    assert_eq!(files.len(), 2);
    assert!(files[0].ends_with("a/a_frame_0000_00m00s_analysis.json"));
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Progress>>,
}

impl ProgressReporter for Recorder {
    fn on_import_progress(&self, progress: Progress) {
        self.events.lock().unwrap().push(progress);
    }
}

#[test]
fn test_import_progress_after_every_document() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "clip/clip_frame_0000_00m00s_analysis.json", &json!({}));
    fs::write(
        dir.path().join("clip/clip_frame_0001_00m05s_analysis.json"),
        "garbage",
    )
    .unwrap();

    let db = Database::open_in_memory().unwrap();
    let recorder = Recorder::default();
    ResultImporter::default()
        .import_directory(&db, dir.path(), &recorder)
        .unwrap();

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].fraction, 1.0);
    assert!(events.windows(2).all(|w| w[0].fraction <= w[1].fraction));
}
