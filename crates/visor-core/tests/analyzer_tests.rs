use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;

use visor_core::analyzer::{EncodedImage, FrameAnalyzer, ResultDocument, VisionService};
use visor_core::prompt::{build_analysis_prompt, SafetyChecks};
use visor_core::{Error, Progress, ProgressReporter, SilentReporter};

/// Replays scripted responses in order and remembers what it was sent.
#[derive(Default)]
struct ScriptedVision {
    responses: RefCell<VecDeque<Result<String, Error>>>,
    calls: RefCell<Vec<(String, String)>>,
}

impl ScriptedVision {
    fn with(responses: Vec<Result<String, Error>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl VisionService for &ScriptedVision {
    fn analyze(&self, prompt: &str, image: &EncodedImage) -> Result<String, Error> {
        self.calls
            .borrow_mut()
            .push((prompt.to_string(), image.mime_type.to_string()));
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok("{\"violations\": []}".to_string()))
    }
}

fn write_image(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"not really an image").unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_failures_are_isolated_per_frame() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    let results = dir.path().join("results");
    write_image(&frames, "clip/clip_frame_0000_00m00s.jpg");
    write_image(&frames, "clip/clip_frame_0001_00m05s.png");
    write_image(&frames, "yard/yard_frame_0000_00m00s.jpeg");
    fs::write(frames.join("clip/notes.txt"), "skip me").unwrap();

    let vision = ScriptedVision::with(vec![
        Ok("Here you go:\n```json\n{\"violations\": [\"No hard hat\"], \"worker_count\": 1}\n```".to_string()),
        Err(Error::AnalysisRequestFailed("unexpected status 500".to_string())),
        Ok("Sorry, I can't tell from this image.".to_string()),
    ]);
    let mut analyzer = FrameAnalyzer::new(&vision, "prompt".to_string(), Duration::ZERO);

    let summary = analyzer
        .analyze_directory(&frames, &results, &SilentReporter, &AtomicBool::new(false))
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.result_files.len(), 3);

    let ok = read_json(&results.join("clip/clip_frame_0000_00m00s_analysis.json"));
    assert_eq!(ok["violations"][0], "No hard hat");
    assert_eq!(ok["worker_count"], 1);
    assert!(ok["image_path"].as_str().unwrap().ends_with("clip_frame_0000_00m00s.jpg"));
    assert!(ok["timestamp"].is_string());
    assert!(ok.get("error").is_none());

    let request_failed = read_json(&results.join("clip/clip_frame_0001_00m05s_analysis.json"));
    assert!(request_failed["error"].as_str().unwrap().contains("500"));
    assert!(request_failed.get("raw_response").is_none());
    assert!(request_failed.get("violations").is_none());

    let parse_failed = read_json(&results.join("yard/yard_frame_0000_00m00s_analysis.json"));
    assert!(parse_failed["error"].is_string());
    assert_eq!(parse_failed["raw_response"], "Sorry, I can't tell from this image.");
}

#[test]
fn test_each_image_sent_once_with_prompt() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    write_image(&frames, "clip/a.jpg");
    write_image(&frames, "clip/b.png");

    let prompt = build_analysis_prompt(&SafetyChecks::default(), &["Is the crane in use?".to_string()]);
    let vision = ScriptedVision::default();
    let mut analyzer = FrameAnalyzer::new(&vision, prompt.clone(), Duration::ZERO);
    analyzer
        .analyze_directory(
            &frames,
            &dir.path().join("results"),
            &SilentReporter,
            &AtomicBool::new(false),
        )
        .unwrap();

    let calls = vision.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(p, _)| *p == prompt));
    assert_eq!(calls[0].1, "image/jpeg");
    assert_eq!(calls[1].1, "image/png");
}

#[test]
fn test_written_documents_read_back_as_tagged_union() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    let results = dir.path().join("results");
    write_image(&frames, "clip/a.jpg");
    write_image(&frames, "clip/b.jpg");

    let vision = ScriptedVision::with(vec![
        Ok("{\"violations\": []}".to_string()),
        Ok("[not, json".to_string()),
    ]);
    let mut analyzer = FrameAnalyzer::new(&vision, "p".to_string(), Duration::ZERO);
    analyzer
        .analyze_directory(&frames, &results, &SilentReporter, &AtomicBool::new(false))
        .unwrap();

    let a = ResultDocument::from_json(read_json(&results.join("clip/a_analysis.json"))).unwrap();
    let b = ResultDocument::from_json(read_json(&results.join("clip/b_analysis.json"))).unwrap();
    assert!(!a.is_failure());
    assert!(b.is_failure());
    match b {
        ResultDocument::Failed { raw_response, .. } => {
            assert_eq!(raw_response.as_deref(), Some("[not, json"))
        }
        other => panic!("expected a failed document, got {:?}", other),
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Progress>>,
    started: Mutex<Option<usize>>,
}

impl ProgressReporter for Recorder {
    fn on_analysis_start(&self, total_frames: usize) {
        *self.started.lock().unwrap() = Some(total_frames);
    }

    fn on_analysis_progress(&self, progress: Progress) {
        self.events.lock().unwrap().push(progress);
    }
}

#[test]
fn test_progress_after_every_frame_including_failures() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    for i in 0..4 {
        write_image(&frames, &format!("clip/clip_frame_{:04}_00m{:02}s.jpg", i, i * 2));
    }

    let vision = ScriptedVision::with(vec![
        Ok("{}".to_string()),
        Err(Error::AnalysisRequestFailed("timeout".to_string())),
        Ok("garbage".to_string()),
        Ok("{}".to_string()),
    ]);
    let mut analyzer = FrameAnalyzer::new(&vision, "p".to_string(), Duration::ZERO);
    let recorder = Recorder::default();
    analyzer
        .analyze_directory(
            &frames,
            &dir.path().join("results"),
            &recorder,
            &AtomicBool::new(false),
        )
        .unwrap();

    assert_eq!(*recorder.started.lock().unwrap(), Some(4));
    let events = recorder.events.lock().unwrap();
    let done: Vec<usize> = events.iter().map(|p| p.done).collect();
    assert_eq!(done, vec![1, 2, 3, 4]);
    assert!(events.windows(2).all(|w| w[0].fraction <= w[1].fraction));
    assert_eq!(events[3].fraction, 1.0);
}

#[test]
fn test_cancelled_before_first_request() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    write_image(&frames, "clip/a.jpg");

    let vision = ScriptedVision::default();
    let mut analyzer = FrameAnalyzer::new(&vision, "p".to_string(), Duration::ZERO);
    let result = analyzer.analyze_directory(
        &frames,
        &dir.path().join("results"),
        &SilentReporter,
        &AtomicBool::new(true),
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(vision.calls.borrow().is_empty());
}

#[test]
fn test_empty_frames_dir() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    fs::create_dir_all(&frames).unwrap();

    let vision = ScriptedVision::default();
    let mut analyzer = FrameAnalyzer::new(&vision, "p".to_string(), Duration::ZERO);
    let summary = analyzer
        .analyze_directory(
            &frames,
            &dir.path().join("results"),
            &SilentReporter,
            &AtomicBool::new(false),
        )
        .unwrap();
    assert_eq!(summary.total, 0);
    assert!(summary.result_files.is_empty());
}

#[test]
fn test_same_stem_images_do_not_share_a_result() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    let results = dir.path().join("results");
    write_image(&frames, "clip/x.jpg");
    write_image(&frames, "clip/x.png");

    let vision = ScriptedVision::with(vec![Ok("{\"violations\": [\"first\"]}".to_string())]);
    let mut analyzer = FrameAnalyzer::new(&vision, "p".to_string(), Duration::ZERO);
    let summary = analyzer
        .analyze_directory(&frames, &results, &SilentReporter, &AtomicBool::new(false))
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.result_files.len(), 1);
    assert_eq!(vision.calls.borrow().len(), 1);

    let doc = read_json(&results.join("clip/x_analysis.json"));
    assert_eq!(doc["violations"][0], "first");
    assert!(doc["image_path"].as_str().unwrap().ends_with("x.jpg"));
}

#[test]
fn test_analyze_files_only_touches_listed_images() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    let results = dir.path().join("results");
    write_image(&frames, "clip/clip_frame_0000_00m00s.jpg");
    write_image(&frames, "clip/clip_frame_0001_00m02s.jpg");
    write_image(&frames, "clip/clip_frame_0001_00m05s.jpg");

    let listed = vec![
        frames.join("clip/clip_frame_0000_00m00s.jpg"),
        frames.join("clip/clip_frame_0001_00m05s.jpg"),
    ];
    let vision = ScriptedVision::default();
    let mut analyzer = FrameAnalyzer::new(&vision, "p".to_string(), Duration::ZERO);
    let summary = analyzer
        .analyze_files(
            &frames.join("clip"),
            &listed,
            &results.join("clip"),
            &SilentReporter,
            &AtomicBool::new(false),
        )
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(vision.calls.borrow().len(), 2);
    assert_eq!(
        summary.result_files,
        vec![
            results.join("clip/clip_frame_0000_00m00s_analysis.json"),
            results.join("clip/clip_frame_0001_00m05s_analysis.json"),
        ]
    );
    assert!(!results.join("clip/clip_frame_0001_00m02s_analysis.json").exists());
}
