use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use super::{VideoInfo, VideoSource};
use crate::error::Error;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Decodes frames with the `ffmpeg`/`ffprobe` binaries on `PATH`.
pub struct FfmpegSource {
    path: PathBuf,
    info: VideoInfo,
}

impl FfmpegSource {
    /// Probes the container. Fails with `SourceUnavailable` when it cannot be
    /// read or reports no usable frame rate.
    pub fn open(path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::source_unavailable(path, "file not found"));
        }

        let output = Command::new("ffprobe")
            .args(["-v", "error"])
            .args(["-select_streams", "v:0"])
            .args([
                "-show_entries",
                "stream=r_frame_rate,avg_frame_rate,nb_frames,duration:format=duration",
            ])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::source_unavailable(path, format!("failed to spawn ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::source_unavailable(path, stderr.trim().to_string()));
        }

        let info = parse_probe_output(path, &String::from_utf8_lossy(&output.stdout))?;
        debug!(
            "Probed {}: {:.3} fps, {} frames, {:.2}s",
            path.display(),
            info.fps,
            info.frame_count,
            info.duration_secs
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn extract_frame(&self, native_index: u64, dest: &Path) -> Result<bool, Error> {
        clear_destination(dest)?;
        let seek = native_index as f64 / self.info.fps;
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-ss", &format!("{:.6}", seek)])
            .arg("-i")
            .arg(&self.path)
            .args(["-an", "-sn"])
            .args(["-frames:v", "1"])
            .args(["-q:v", "2"])
            .arg("-y")
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                Error::source_unavailable(&self.path, format!("failed to spawn ffmpeg: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::source_unavailable(
                &self.path,
                format!("ffmpeg failed at frame {}: {}", native_index, stderr.trim()),
            ));
        }

        // Seeking past the last decodable frame succeeds with no output.
        Ok(frame_written(dest))
    }
}

/// Removes an image left at `dest` by an earlier run, so that only ffmpeg
/// output counts as a written frame.
fn clear_destination(dest: &Path) -> Result<(), Error> {
    match fs::remove_file(dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn frame_written(dest: &Path) -> bool {
    fs::metadata(dest).map(|m| m.len() > 0).unwrap_or(false)
}

/// Rates arrive as `num/den` (`30000/1001`); `0/0` means unknown.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_positive(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

pub(crate) fn parse_probe_output(path: &Path, json: &str) -> Result<VideoInfo, Error> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| Error::source_unavailable(path, format!("unreadable ffprobe output: {}", e)))?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| Error::source_unavailable(path, "no video stream"))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| Error::source_unavailable(path, "frame rate unreadable"))?;

    let duration = parse_positive(stream.duration.as_ref())
        .or_else(|| parse_positive(probe.format.as_ref().and_then(|f| f.duration.as_ref())));
    let frame_count = parse_positive(stream.nb_frames.as_ref()).map(|n| n as u64);

    let (frame_count, duration_secs) = match (frame_count, duration) {
        (Some(count), Some(duration)) => (count, duration),
        (Some(count), None) => (count, count as f64 / fps),
        (None, Some(duration)) => ((duration * fps).round() as u64, duration),
        (None, None) => {
            return Err(Error::source_unavailable(path, "video length unreadable"));
        }
    };

    Ok(VideoInfo {
        path: path.to_path_buf(),
        fps,
        frame_count,
        duration_secs,
    })
}
