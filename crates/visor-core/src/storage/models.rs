use serde::Serialize;

/// A source video, identified by its base name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Video {
    pub id: i64,
    pub video_name: String,
    pub filepath: Option<String>,
    pub duration_seconds: Option<f64>,
    pub frame_count: Option<i64>,
    pub created_at: String,
}

/// One sampled frame; belongs to a video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub id: i64,
    pub video_id: i64,
    pub frame_number: i64,
    pub timestamp_seconds: i64,
    pub image_path: String,
    pub worker_count: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub id: i64,
    pub frame_id: i64,
    pub violation_type: String,
    pub description: String,
    pub location: Option<String>,
    pub severity: Option<String>,
    pub recommendation: Option<String>,
    pub created_at: String,
}

/// A per-frame heuristic worker tag. Not unique across frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerIdentifier {
    pub id: i64,
    pub frame_id: i64,
    pub worker_id: String,
    pub features: String,
    pub created_at: String,
}

/// Links a worker identifier to a violation of the same frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerViolation {
    pub id: i64,
    pub worker_identifier_id: i64,
    pub violation_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub id: i64,
    pub frame_id: i64,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub confidence: Option<String>,
    pub created_at: String,
}

// ── Insert payloads ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewVideo {
    pub video_name: String,
    pub filepath: Option<String>,
    pub duration_seconds: Option<f64>,
    pub frame_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFrame {
    pub video_id: i64,
    pub frame_number: i64,
    pub timestamp_seconds: i64,
    pub image_path: String,
    pub worker_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewViolation {
    pub violation_type: String,
    pub description: String,
    pub location: Option<String>,
    pub severity: Option<String>,
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewQueryAnswer {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub confidence: Option<String>,
}

// ── Query layer rows ────────────────────────────────────────────

/// Row counts for each of the six tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub videos: i64,
    pub frames: i64,
    pub violations: i64,
    pub worker_identifiers: i64,
    pub worker_violations: i64,
    pub query_answers: i64,
}

impl TableCounts {
    pub fn total(&self) -> i64 {
        self.videos
            + self.frames
            + self.violations
            + self.worker_identifiers
            + self.worker_violations
            + self.query_answers
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViolationStats {
    pub total_violations: i64,
    pub by_type: Vec<(String, i64)>,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub frames_with_violations: i64,
    pub total_frames: i64,
    /// Percentage of frames with at least one violation.
    pub violation_rate: f64,
}

/// A violation joined with where it was seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationRecord {
    pub id: i64,
    pub description: String,
    pub location: Option<String>,
    pub severity: Option<String>,
    pub violation_type: String,
    pub recommendation: Option<String>,
    pub image_path: String,
    pub timestamp_seconds: i64,
    pub video_name: String,
    pub frame_number: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub violation_type: Option<String>,
    pub severity: Option<String>,
    /// Restrict to these videos; empty means all.
    pub video_names: Vec<String>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameViolationCount {
    pub video_name: String,
    pub frame_number: i64,
    pub violation_count: i64,
    pub image_path: String,
    pub timestamp_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswerRecord {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub confidence: Option<String>,
    pub image_path: String,
    pub video_name: String,
    pub timestamp_seconds: i64,
}

/// Cross-frame view of one worker tag, matched by identifier string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerAppearance {
    pub worker_id: String,
    pub frames_seen: i64,
    pub violations_linked: i64,
    pub first_seen_seconds: i64,
    pub last_seen_seconds: i64,
}
