use super::models::*;
use super::sqlite::Database;
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

impl Database {
    // ── Videos ───────────────────────────────────────────────────

    pub fn insert_video(&self, video: &NewVideo) -> Result<i64> {
        self.connection()
            .prepare_cached(
                "INSERT INTO videos (video_name, filepath, duration_seconds, frame_count) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                video.video_name,
                video.filepath,
                video.duration_seconds,
                video.frame_count
            ])?;
        let id = self.connection().last_insert_rowid();
        debug!("Created video {} ({})", id, video.video_name);
        Ok(id)
    }

    /// The oldest video row with this name, if any.
    pub fn find_video_by_name(&self, video_name: &str) -> Result<Option<i64>> {
        self.connection()
            .prepare_cached("SELECT id FROM videos WHERE video_name = ?1 ORDER BY id LIMIT 1")?
            .query_row(params![video_name], |row| row.get(0))
            .optional()
    }

    pub fn list_videos(&self) -> Result<Vec<Video>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, video_name, filepath, duration_seconds, frame_count, created_at \
             FROM videos ORDER BY id",
        )?;
        let videos = stmt
            .query_map([], |row| {
                Ok(Video {
                    id: row.get(0)?,
                    video_name: row.get(1)?,
                    filepath: row.get(2)?,
                    duration_seconds: row.get(3)?,
                    frame_count: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(videos)
    }

    // ── Frames ───────────────────────────────────────────────────

    pub fn insert_frame(&self, frame: &NewFrame) -> Result<i64> {
        self.connection()
            .prepare_cached(
                "INSERT INTO frames \
                 (video_id, frame_number, timestamp_seconds, image_path, worker_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                frame.video_id,
                frame.frame_number,
                frame.timestamp_seconds,
                frame.image_path,
                frame.worker_count
            ])?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn frame_exists_for_image(&self, image_path: &str) -> Result<bool> {
        self.connection()
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM frames WHERE image_path = ?1)")?
            .query_row(params![image_path], |row| row.get(0))
    }

    pub fn frames_for_video(&self, video_id: i64) -> Result<Vec<Frame>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, video_id, frame_number, timestamp_seconds, image_path, \
                    worker_count, created_at \
             FROM frames WHERE video_id = ?1 ORDER BY frame_number, id",
        )?;
        let frames = stmt
            .query_map(params![video_id], |row| {
                Ok(Frame {
                    id: row.get(0)?,
                    video_id: row.get(1)?,
                    frame_number: row.get(2)?,
                    timestamp_seconds: row.get(3)?,
                    image_path: row.get(4)?,
                    worker_count: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(frames)
    }

    // ── Violations ───────────────────────────────────────────────

    pub fn insert_violation(&self, frame_id: i64, violation: &NewViolation) -> Result<i64> {
        self.connection()
            .prepare_cached(
                "INSERT INTO violations \
                 (frame_id, violation_type, description, location, severity, recommendation) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                frame_id,
                violation.violation_type,
                violation.description,
                violation.location,
                violation.severity,
                violation.recommendation
            ])?;
        Ok(self.connection().last_insert_rowid())
    }

    /// The `ordinal`-th violation created for a frame (0-based, creation order).
    pub fn nth_violation_in_frame(&self, frame_id: i64, ordinal: i64) -> Result<Option<i64>> {
        if ordinal < 0 {
            return Ok(None);
        }
        self.connection()
            .prepare_cached(
                "SELECT id FROM violations WHERE frame_id = ?1 \
                 ORDER BY id LIMIT 1 OFFSET ?2",
            )?
            .query_row(params![frame_id, ordinal], |row| row.get(0))
            .optional()
    }

    pub fn violations_for_frame(&self, frame_id: i64) -> Result<Vec<Violation>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, frame_id, violation_type, description, location, severity, \
                    recommendation, created_at \
             FROM violations WHERE frame_id = ?1 ORDER BY id",
        )?;
        let violations = stmt
            .query_map(params![frame_id], |row| {
                Ok(Violation {
                    id: row.get(0)?,
                    frame_id: row.get(1)?,
                    violation_type: row.get(2)?,
                    description: row.get(3)?,
                    location: row.get(4)?,
                    severity: row.get(5)?,
                    recommendation: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(violations)
    }

    // ── Workers ──────────────────────────────────────────────────

    pub fn insert_worker_identifier(
        &self,
        frame_id: i64,
        worker_id: &str,
        features: &str,
    ) -> Result<i64> {
        self.connection()
            .prepare_cached(
                "INSERT INTO worker_identifiers (frame_id, worker_id, features) \
                 VALUES (?1, ?2, ?3)",
            )?
            .execute(params![frame_id, worker_id, features])?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Links a worker to a violation. Nothing is inserted unless both rows
    /// belong to the same frame; returns the number of rows inserted.
    pub fn insert_worker_violation(
        &self,
        worker_identifier_id: i64,
        violation_id: i64,
    ) -> Result<usize> {
        self.connection()
            .prepare_cached(
                "INSERT INTO worker_violations (worker_identifier_id, violation_id) \
                 SELECT w.id, v.id FROM worker_identifiers w \
                 JOIN violations v ON v.frame_id = w.frame_id \
                 WHERE w.id = ?1 AND v.id = ?2",
            )?
            .execute(params![worker_identifier_id, violation_id])
    }

    pub fn workers_for_frame(&self, frame_id: i64) -> Result<Vec<WorkerIdentifier>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, frame_id, worker_id, features, created_at \
             FROM worker_identifiers WHERE frame_id = ?1 ORDER BY id",
        )?;
        let workers = stmt
            .query_map(params![frame_id], |row| {
                Ok(WorkerIdentifier {
                    id: row.get(0)?,
                    frame_id: row.get(1)?,
                    worker_id: row.get(2)?,
                    features: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(workers)
    }

    pub fn worker_violation_links(&self, worker_identifier_id: i64) -> Result<Vec<WorkerViolation>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, worker_identifier_id, violation_id, created_at \
             FROM worker_violations WHERE worker_identifier_id = ?1 ORDER BY id",
        )?;
        let links = stmt
            .query_map(params![worker_identifier_id], |row| {
                Ok(WorkerViolation {
                    id: row.get(0)?,
                    worker_identifier_id: row.get(1)?,
                    violation_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(links)
    }

    // ── Query answers ────────────────────────────────────────────

    pub fn insert_query_answer(&self, frame_id: i64, answer: &NewQueryAnswer) -> Result<i64> {
        self.connection()
            .prepare_cached(
                "INSERT INTO query_answers (frame_id, question, answer, confidence) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                frame_id,
                answer.question,
                answer.answer,
                answer.confidence
            ])?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn query_answers_for_frame(&self, frame_id: i64) -> Result<Vec<QueryAnswer>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, frame_id, question, answer, confidence, created_at \
             FROM query_answers WHERE frame_id = ?1 ORDER BY id",
        )?;
        let answers = stmt
            .query_map(params![frame_id], |row| {
                Ok(QueryAnswer {
                    id: row.get(0)?,
                    frame_id: row.get(1)?,
                    question: row.get(2)?,
                    answer: row.get(3)?,
                    confidence: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(answers)
    }

    // ── Housekeeping ─────────────────────────────────────────────

    pub fn table_counts(&self) -> Result<TableCounts> {
        self.connection().query_row(
            "SELECT \
                (SELECT COUNT(*) FROM videos), \
                (SELECT COUNT(*) FROM frames), \
                (SELECT COUNT(*) FROM violations), \
                (SELECT COUNT(*) FROM worker_identifiers), \
                (SELECT COUNT(*) FROM worker_violations), \
                (SELECT COUNT(*) FROM query_answers)",
            [],
            table_counts_from_row,
        )
    }
}

fn table_counts_from_row(row: &Row<'_>) -> Result<TableCounts> {
    Ok(TableCounts {
        videos: row.get(0)?,
        frames: row.get(1)?,
        violations: row.get(2)?,
        worker_identifiers: row.get(3)?,
        worker_violations: row.get(4)?,
        query_answers: row.get(5)?,
    })
}
