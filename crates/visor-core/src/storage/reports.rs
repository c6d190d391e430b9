//! Read-only aggregations over an imported store.
//!
//! Methods that take `video_names` restrict themselves to those videos; an
//! empty slice means every video.

use super::models::*;
use super::sqlite::Database;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Result, Row};
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::info;

const VIOLATION_RECORD_COLUMNS: &str = "v.id, v.description, v.location, v.severity, \
     v.violation_type, v.recommendation, f.image_path, f.timestamp_seconds, \
     vid.video_name, f.frame_number";

const VIOLATION_JOINS: &str = "FROM violations v \
     JOIN frames f ON v.frame_id = f.id \
     JOIN videos vid ON f.video_id = vid.id";

impl Database {
    pub fn violation_stats(&self, video_names: &[String]) -> Result<ViolationStats> {
        let conn = self.connection();
        let mut args = Vec::new();
        let filter = video_condition(video_names, &mut args);
        let where_clause = where_all(&[filter.as_str()]);

        let total_violations: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {} {}", VIOLATION_JOINS, where_clause),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT v.violation_type, COUNT(*) AS n {} {} \
             GROUP BY v.violation_type ORDER BY n DESC, v.violation_type",
            VIOLATION_JOINS, where_clause
        ))?;
        let by_type = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;

        let mut stats = ViolationStats {
            total_violations,
            by_type,
            ..Default::default()
        };

        let severity_where = where_all(&["v.severity IS NOT NULL", filter.as_str()]);
        let mut stmt = conn.prepare(&format!(
            "SELECT v.severity, COUNT(*) {} {} GROUP BY v.severity",
            VIOLATION_JOINS, severity_where
        ))?;
        let severities = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        for (severity, count) in severities {
            match severity.as_str() {
                "high" => stats.high = count,
                "medium" => stats.medium = count,
                "low" => stats.low = count,
                _ => {}
            }
        }

        stats.frames_with_violations = conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT v.frame_id) {} {}",
                VIOLATION_JOINS, where_clause
            ),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        stats.total_frames = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM frames f JOIN videos vid ON f.video_id = vid.id {}",
                where_clause
            ),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        stats.violation_rate = if stats.total_frames > 0 {
            stats.frames_with_violations as f64 / stats.total_frames as f64 * 100.0
        } else {
            0.0
        };

        Ok(stats)
    }

    /// Violations matching every set field of `filter`, newest first.
    pub fn violations_filtered(&self, filter: &ViolationFilter) -> Result<Vec<ViolationRecord>> {
        let mut args = Vec::new();
        let mut conditions = Vec::new();

        if let Some(violation_type) = &filter.violation_type {
            args.push(Value::Text(violation_type.clone()));
            conditions.push(format!("v.violation_type = ?{}", args.len()));
        }
        if let Some(severity) = &filter.severity {
            args.push(Value::Text(severity.trim().to_lowercase()));
            conditions.push(format!("v.severity = ?{}", args.len()));
        }
        conditions.push(video_condition(&filter.video_names, &mut args));

        args.push(Value::Integer(filter.limit));
        let sql = format!(
            "SELECT {} {} {} ORDER BY v.id DESC LIMIT ?{}",
            VIOLATION_RECORD_COLUMNS,
            VIOLATION_JOINS,
            where_all(&conditions.iter().map(String::as_str).collect::<Vec<_>>()),
            args.len()
        );

        let mut stmt = self.connection().prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), violation_record_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Frames with the most violations.
    pub fn worst_frames(&self, limit: i64) -> Result<Vec<FrameViolationCount>> {
        let mut stmt = self.connection().prepare(
            "SELECT vid.video_name, f.frame_number, COUNT(*) AS violation_count, \
                    f.image_path, f.timestamp_seconds \
             FROM violations v \
             JOIN frames f ON v.frame_id = f.id \
             JOIN videos vid ON f.video_id = vid.id \
             GROUP BY f.id \
             ORDER BY violation_count DESC, f.id \
             LIMIT ?1",
        )?;
        let frames = stmt
            .query_map(params![limit], |row| {
                Ok(FrameViolationCount {
                    video_name: row.get(0)?,
                    frame_number: row.get(1)?,
                    violation_count: row.get(2)?,
                    image_path: row.get(3)?,
                    timestamp_seconds: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(frames)
    }

    /// `(timestamp_seconds, violation count)` ascending by timestamp.
    pub fn violation_trends(&self, video_names: &[String]) -> Result<Vec<(i64, i64)>> {
        let mut args = Vec::new();
        let filter = video_condition(video_names, &mut args);
        let mut stmt = self.connection().prepare(&format!(
            "SELECT f.timestamp_seconds, COUNT(v.id) {} {} \
             GROUP BY f.timestamp_seconds ORDER BY f.timestamp_seconds",
            VIOLATION_JOINS,
            where_all(&[filter.as_str()])
        ))?;
        let trends = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(trends)
    }

    /// Substring search over question and answer text, newest first.
    pub fn search_query_answers(&self, text: &str, limit: i64) -> Result<Vec<QueryAnswerRecord>> {
        let pattern = format!("%{}%", text);
        let mut stmt = self.connection().prepare(
            "SELECT q.question, q.answer, q.confidence, f.image_path, vid.video_name, \
                    f.timestamp_seconds \
             FROM query_answers q \
             JOIN frames f ON q.frame_id = f.id \
             JOIN videos vid ON f.video_id = vid.id \
             WHERE q.question LIKE ?1 OR q.answer LIKE ?1 \
             ORDER BY q.id DESC \
             LIMIT ?2",
        )?;
        let answers = stmt
            .query_map(params![pattern, limit], |row| {
                Ok(QueryAnswerRecord {
                    question: row.get(0)?,
                    answer: row.get(1)?,
                    confidence: row.get(2)?,
                    image_path: row.get(3)?,
                    video_name: row.get(4)?,
                    timestamp_seconds: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(answers)
    }

    /// Substring search over description, location and type, newest first.
    pub fn search_violations(&self, text: &str, limit: i64) -> Result<Vec<ViolationRecord>> {
        let pattern = format!("%{}%", text);
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} {} \
             WHERE v.description LIKE ?1 OR v.location LIKE ?1 OR v.violation_type LIKE ?1 \
             ORDER BY v.id DESC LIMIT ?2",
            VIOLATION_RECORD_COLUMNS, VIOLATION_JOINS
        ))?;
        let records = stmt
            .query_map(params![pattern, limit], violation_record_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Most frequent non-empty recommendations with their counts.
    pub fn top_recommendations(&self, limit: i64) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.connection().prepare(
            "SELECT recommendation, COUNT(*) AS n FROM violations \
             WHERE recommendation IS NOT NULL AND recommendation != '' \
             GROUP BY recommendation \
             ORDER BY n DESC, recommendation \
             LIMIT ?1",
        )?;
        let recommendations = stmt
            .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(recommendations)
    }

    /// Groups worker identifiers across frames by their identifier string.
    /// Two rows with the same tag are assumed to be the same person; nothing
    /// stronger than string equality backs that.
    pub fn worker_appearances(&self, limit: i64) -> Result<Vec<WorkerAppearance>> {
        let mut stmt = self.connection().prepare(
            "SELECT w.worker_id, COUNT(DISTINCT w.frame_id) AS frames_seen, \
                    COUNT(wv.id) AS violations_linked, \
                    MIN(f.timestamp_seconds), MAX(f.timestamp_seconds) \
             FROM worker_identifiers w \
             JOIN frames f ON w.frame_id = f.id \
             LEFT JOIN worker_violations wv ON wv.worker_identifier_id = w.id \
             GROUP BY w.worker_id \
             ORDER BY violations_linked DESC, frames_seen DESC, w.worker_id \
             LIMIT ?1",
        )?;
        let workers = stmt
            .query_map(params![limit], |row| {
                Ok(WorkerAppearance {
                    worker_id: row.get(0)?,
                    frames_seen: row.get(1)?,
                    violations_linked: row.get(2)?,
                    first_seen_seconds: row.get(3)?,
                    last_seen_seconds: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(workers)
    }

    pub fn distinct_violation_types(&self) -> Result<Vec<String>> {
        let mut stmt = self.connection().prepare(
            "SELECT DISTINCT violation_type FROM violations ORDER BY violation_type",
        )?;
        let types = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(types)
    }

    /// Every violation ordered by video and timestamp.
    pub fn all_violation_records(&self) -> Result<Vec<ViolationRecord>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} {} ORDER BY vid.video_name, f.timestamp_seconds, v.id",
            VIOLATION_RECORD_COLUMNS, VIOLATION_JOINS
        ))?;
        let records = stmt
            .query_map([], violation_record_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Writes `{"violations": [...], "exported_at": ...}` to `path` and
    /// returns how many violations were exported.
    pub fn export_violations_report(&self, path: &Path) -> std::result::Result<usize, crate::Error> {
        let violations = self.all_violation_records()?;
        let report = json!({
            "violations": violations,
            "exported_at": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("Exported {} violations to {}", violations.len(), path.display());
        Ok(violations.len())
    }
}

fn violation_record_from_row(row: &Row<'_>) -> Result<ViolationRecord> {
    Ok(ViolationRecord {
        id: row.get(0)?,
        description: row.get(1)?,
        location: row.get(2)?,
        severity: row.get(3)?,
        violation_type: row.get(4)?,
        recommendation: row.get(5)?,
        image_path: row.get(6)?,
        timestamp_seconds: row.get(7)?,
        video_name: row.get(8)?,
        frame_number: row.get(9)?,
    })
}

/// `vid.video_name IN (...)` with numbered placeholders appended to `args`,
/// or an empty string when no videos are named.
fn video_condition(video_names: &[String], args: &mut Vec<Value>) -> String {
    if video_names.is_empty() {
        return String::new();
    }
    let placeholders: Vec<String> = video_names
        .iter()
        .map(|name| {
            args.push(Value::Text(name.clone()));
            format!("?{}", args.len())
        })
        .collect();
    format!("vid.video_name IN ({})", placeholders.join(", "))
}

fn where_all(conditions: &[&str]) -> String {
    let conditions: Vec<&str> = conditions
        .iter()
        .copied()
        .filter(|c| !c.is_empty())
        .collect();
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}
