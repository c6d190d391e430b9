//! Loads analysis result documents into the relational store.

pub mod normalize;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analyzer::ResultDocument;
use crate::config::ImportMode;
use crate::error::Error;
use crate::progress::{Progress, ProgressReporter};
use crate::sampler::naming::{FrameName, RESULT_SUFFIX};
use crate::sampler::VideoInfo;
use crate::storage::models::{NewFrame, NewQueryAnswer, NewVideo, NewViolation};
use crate::storage::Database;
use normalize::{
    array_entry, array_field, coerce_count, coerce_index, coerce_text, infer_violation_type,
    normalize_level, violation_text,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub documents_found: usize,
    pub imported: usize,
    pub skipped_malformed: usize,
    pub skipped_existing: usize,
    /// Documents rolled back because the store rejected a write.
    pub rolled_back: usize,
    /// Error documents; each still produces a frame.
    pub failed_analyses: usize,
    pub videos_created: usize,
    pub frames: usize,
    pub violations: usize,
    pub worker_identifiers: usize,
    pub worker_links: usize,
    pub query_answers: usize,
}

impl ImportStats {
    fn add(&mut self, doc: &DocumentCounts) {
        self.imported += 1;
        self.frames += 1;
        self.violations += doc.violations;
        self.worker_identifiers += doc.worker_identifiers;
        self.worker_links += doc.worker_links;
        self.query_answers += doc.query_answers;
        if doc.video_created {
            self.videos_created += 1;
        }
    }
}

#[derive(Debug, Default)]
struct DocumentCounts {
    video_created: bool,
    violations: usize,
    worker_identifiers: usize,
    worker_links: usize,
    query_answers: usize,
}

/// Where a document's frame belongs, recovered from its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameIdentity {
    pub video_name: String,
    pub frame_number: i64,
    pub timestamp_seconds: i64,
}

impl FrameIdentity {
    /// Parses `<video>_frame_<seq>_<MM>m<SS>s_analysis.json`. When the name
    /// does not follow that shape, the parent directory names the video and
    /// frame number and timestamp are both zero.
    pub fn from_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match FrameName::parse_result_file_name(&file_name) {
            Ok(name) => FrameIdentity {
                video_name: name.video_name,
                frame_number: i64::from(name.sequence),
                timestamp_seconds: i64::from(name.timestamp_secs),
            },
            Err(e) => {
                let video_name = path
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                debug!("{}; using directory name '{}'", e, video_name);
                FrameIdentity {
                    video_name,
                    frame_number: 0,
                    timestamp_seconds: 0,
                }
            }
        }
    }
}

/// Imports result documents. Video rows are de-duplicated by name within one
/// import call; across calls, [`ImportMode`] decides.
#[derive(Debug, Clone, Default)]
pub struct ResultImporter {
    mode: ImportMode,
    video_info: HashMap<String, VideoInfo>,
}

impl ResultImporter {
    pub fn new(mode: ImportMode) -> Self {
        Self {
            mode,
            video_info: HashMap::new(),
        }
    }

    /// Container metadata recorded on a video's row when it is created.
    pub fn with_video_info(mut self, info: impl IntoIterator<Item = (String, VideoInfo)>) -> Self {
        self.video_info.extend(info);
        self
    }

    pub fn mode(&self) -> ImportMode {
        self.mode
    }

    /// Imports every `*_analysis.json` under `results_dir`. Malformed
    /// documents are logged and skipped; only a missing directory or an
    /// unusable store fails the call.
    pub fn import_directory(
        &self,
        db: &Database,
        results_dir: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<ImportStats, Error> {
        if !results_dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("results directory not found: {}", results_dir.display()),
            )));
        }
        let files = find_result_documents(results_dir);
        info!(
            "Found {} analysis files to import from {}",
            files.len(),
            results_dir.display()
        );
        self.import_files(db, &files, reporter)
    }

    /// Imports the given documents in order.
    pub fn import_files(
        &self,
        db: &Database,
        files: &[PathBuf],
        reporter: &dyn ProgressReporter,
    ) -> Result<ImportStats, Error> {
        let start = Instant::now();
        let total = files.len();
        let mut stats = ImportStats {
            documents_found: total,
            ..Default::default()
        };
        let mut video_ids: HashMap<String, i64> = HashMap::new();

        reporter.on_import_start(total);
        for (i, path) in files.iter().enumerate() {
            match read_document(path) {
                Ok(doc) => self.import_one(db, path, &doc, &mut video_ids, &mut stats),
                Err(e) => {
                    warn!("{}, skipping", e);
                    stats.skipped_malformed += 1;
                }
            }
            reporter.on_import_progress(Progress::new(i + 1, total));
        }
        reporter.on_import_complete(stats.frames, start.elapsed().as_secs_f64());

        info!(
            "Imported {} of {} analysis files ({} malformed, {} already present, {} rolled back)",
            stats.imported,
            total,
            stats.skipped_malformed,
            stats.skipped_existing,
            stats.rolled_back
        );
        Ok(stats)
    }

    fn import_one(
        &self,
        db: &Database,
        path: &Path,
        doc: &ResultDocument,
        video_ids: &mut HashMap<String, i64>,
        stats: &mut ImportStats,
    ) {
        let identity = FrameIdentity::from_path(path);
        let image_path = match doc.image_path() {
            "" => path.to_string_lossy().into_owned(),
            p => p.to_string(),
        };

        if self.mode == ImportMode::SkipExisting {
            match db.frame_exists_for_image(&image_path) {
                Ok(true) => {
                    debug!("Frame for {} already imported, skipping", image_path);
                    stats.skipped_existing += 1;
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Lookup failed for {}: {}", path.display(), e);
                    stats.rolled_back += 1;
                    return;
                }
            }
        }

        let cached_video = video_ids.get(&identity.video_name).copied();
        match self.write_document(db, &identity, &image_path, doc, cached_video) {
            Ok((video_id, counts)) => {
                video_ids.insert(identity.video_name.clone(), video_id);
                if doc.is_failure() {
                    stats.failed_analyses += 1;
                }
                stats.add(&counts);
                debug!(
                    "Imported {} ({} violations, {} workers)",
                    path.display(),
                    counts.violations,
                    counts.worker_identifiers
                );
            }
            Err(e) => {
                warn!("Error importing {}, rolled back: {}", path.display(), e);
                stats.rolled_back += 1;
            }
        }
    }

    /// Writes one document inside its own transaction and returns the video
    /// id it was attached to. The caller's cache is only updated after commit,
    /// so a rolled-back video row is never reused.
    fn write_document(
        &self,
        db: &Database,
        identity: &FrameIdentity,
        image_path: &str,
        doc: &ResultDocument,
        cached_video: Option<i64>,
    ) -> Result<(i64, DocumentCounts), Error> {
        let tx = db.connection().unchecked_transaction()?;
        let mut counts = DocumentCounts::default();

        let video_id = match cached_video {
            Some(id) => id,
            None => self.resolve_video(db, &identity.video_name, &mut counts)?,
        };

        let payload = match doc {
            ResultDocument::Analysis { payload, .. } => Some(payload),
            ResultDocument::Failed { .. } => None,
        };

        let frame_id = db.insert_frame(&NewFrame {
            video_id,
            frame_number: identity.frame_number,
            timestamp_seconds: identity.timestamp_seconds,
            image_path: image_path.to_string(),
            worker_count: payload.and_then(|p| coerce_count(p.get("worker_count"))),
        })?;

        if let Some(payload) = payload {
            insert_violations(db, frame_id, payload, &mut counts)?;
            insert_workers(db, frame_id, payload, &mut counts)?;
            insert_query_answers(db, frame_id, payload, &mut counts)?;
        }

        tx.commit()?;
        Ok((video_id, counts))
    }

    fn resolve_video(
        &self,
        db: &Database,
        video_name: &str,
        counts: &mut DocumentCounts,
    ) -> Result<i64, Error> {
        if self.mode == ImportMode::SkipExisting {
            if let Some(id) = db.find_video_by_name(video_name)? {
                return Ok(id);
            }
        }

        let info = self.video_info.get(video_name);
        let id = db.insert_video(&NewVideo {
            video_name: video_name.to_string(),
            filepath: info.map(|i| i.path.to_string_lossy().into_owned()),
            duration_seconds: info.map(|i| i.duration_secs),
            frame_count: info.and_then(|i| i64::try_from(i.frame_count).ok()),
        })?;
        counts.video_created = true;
        Ok(id)
    }
}

/// Violations zipped positionally with `locations`, `severity` and
/// `recommendations`; a short companion array leaves the rest `NULL`.
fn insert_violations(
    db: &Database,
    frame_id: i64,
    payload: &Map<String, Value>,
    counts: &mut DocumentCounts,
) -> Result<(), Error> {
    for (i, entry) in array_field(payload, "violations").iter().enumerate() {
        let description = violation_text(entry);
        let violation = NewViolation {
            violation_type: infer_violation_type(&description),
            location: array_entry(payload, "locations", i).and_then(coerce_text),
            severity: normalize_level(array_entry(payload, "severity", i)),
            recommendation: array_entry(payload, "recommendations", i).and_then(coerce_text),
            description,
        };
        db.insert_violation(frame_id, &violation)?;
        counts.violations += 1;
    }
    Ok(())
}

/// Worker tags, each linked to the frame's violations by their position in
/// creation order. References past the end are dropped.
fn insert_workers(
    db: &Database,
    frame_id: i64,
    payload: &Map<String, Value>,
    counts: &mut DocumentCounts,
) -> Result<(), Error> {
    for worker in array_field(payload, "worker_identifiers") {
        let Some(worker) = worker.as_object() else {
            debug!("Ignoring non-object worker identifier: {}", worker);
            continue;
        };
        let worker_id = worker.get("worker_id").and_then(coerce_text).unwrap_or_default();
        let features = worker.get("features").and_then(coerce_text).unwrap_or_default();
        let worker_row = db.insert_worker_identifier(frame_id, &worker_id, &features)?;
        counts.worker_identifiers += 1;

        let references = worker
            .get("violations")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for reference in references {
            let Some(ordinal) = coerce_index(reference) else {
                debug!("Ignoring violation reference {} for {}", reference, worker_id);
                continue;
            };
            match db.nth_violation_in_frame(frame_id, ordinal)? {
                Some(violation_id) => {
                    counts.worker_links += db.insert_worker_violation(worker_row, violation_id)?;
                }
                None => debug!(
                    "Violation index {} out of range for worker {}",
                    ordinal, worker_id
                ),
            }
        }
    }
    Ok(())
}

fn insert_query_answers(
    db: &Database,
    frame_id: i64,
    payload: &Map<String, Value>,
    counts: &mut DocumentCounts,
) -> Result<(), Error> {
    for qa in array_field(payload, "query_answers") {
        let Some(qa) = qa.as_object() else {
            continue;
        };
        db.insert_query_answer(
            frame_id,
            &NewQueryAnswer {
                question: qa.get("question").and_then(coerce_text),
                answer: qa.get("answer").and_then(coerce_text),
                confidence: normalize_level(qa.get("confidence")),
            },
        )?;
        counts.query_answers += 1;
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<ResultDocument, Error> {
    let parse_failed = |reason: String| Error::ImportParseFailed {
        path: path.to_path_buf(),
        reason,
    };
    let text = fs::read_to_string(path).map_err(|e| parse_failed(e.to_string()))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| parse_failed(e.to_string()))?;
    ResultDocument::from_json(value).map_err(parse_failed)
}

/// Every `*_analysis.json` below `results_dir`, sorted by path.
pub fn find_result_documents(results_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(results_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(RESULT_SUFFIX))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
