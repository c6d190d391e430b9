use crate::error::Error;

/// Suffix appended to an image stem to name its result document.
pub const RESULT_SUFFIX: &str = "_analysis.json";

const FRAME_TOKEN: &str = "frame";

/// Provenance encoded in a sampled image's file name:
/// `<video_name>_frame_<seq:04>_<min:02>m<sec:02>s`.
///
/// This is the only channel the importer has for recovering frame identity,
/// so `stem()` and `parse_stem()` must stay inverse to each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameName {
    pub video_name: String,
    pub sequence: u32,
    /// Whole seconds from the start of the video.
    pub timestamp_secs: u32,
}

impl FrameName {
    pub fn new(video_name: impl Into<String>, sequence: u32, timestamp_secs: u32) -> Self {
        Self {
            video_name: video_name.into(),
            sequence,
            timestamp_secs,
        }
    }

    /// Truncates a fractional timestamp to whole seconds. The epsilon keeps
    /// `150.0 / 30.0`-style divisions that land a hair under an integer from
    /// losing a second.
    pub fn from_seconds(video_name: impl Into<String>, sequence: u32, seconds: f64) -> Self {
        let whole = (seconds.max(0.0) + 1e-6).floor() as u32;
        Self::new(video_name, sequence, whole)
    }

    pub fn minutes(&self) -> u32 {
        self.timestamp_secs / 60
    }

    pub fn seconds(&self) -> u32 {
        self.timestamp_secs % 60
    }

    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{:04}_{:02}m{:02}s",
            self.video_name,
            FRAME_TOKEN,
            self.sequence,
            self.minutes(),
            self.seconds()
        )
    }

    pub fn image_file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.stem(), extension.trim_start_matches('.'))
    }

    pub fn result_file_name(&self) -> String {
        format!("{}{}", self.stem(), RESULT_SUFFIX)
    }

    /// Parses `<video>_frame_<seq>_<MM>m<SS>s`. The video name is everything
    /// before the first `frame` token, so names containing that token are
    /// not recoverable. Trailing parts after the timestamp are ignored.
    pub fn parse_stem(stem: &str) -> Result<Self, Error> {
        let fail = || Error::FilenameParseFailed(stem.to_string());

        let parts: Vec<&str> = stem.split('_').collect();
        let frame_index = parts
            .iter()
            .position(|p| *p == FRAME_TOKEN)
            .ok_or_else(fail)?;
        if frame_index == 0 {
            return Err(fail());
        }
        let video_name = parts[..frame_index].join("_");

        let sequence: u32 = parts
            .get(frame_index + 1)
            .and_then(|p| parse_digits(p))
            .ok_or_else(fail)?;

        let time_part = parts.get(frame_index + 2).ok_or_else(fail)?;
        let (minutes, seconds) = time_part
            .strip_suffix('s')
            .and_then(|t| t.split_once('m'))
            .ok_or_else(fail)?;
        let minutes = parse_digits(minutes).ok_or_else(fail)?;
        let seconds = parse_digits(seconds).ok_or_else(fail)?;

        Ok(Self::new(video_name, sequence, minutes * 60 + seconds))
    }

    /// Parses a result document name (`<stem>_analysis.json`).
    pub fn parse_result_file_name(file_name: &str) -> Result<Self, Error> {
        let stem = file_name
            .strip_suffix(RESULT_SUFFIX)
            .ok_or_else(|| Error::FilenameParseFailed(file_name.to_string()))?;
        Self::parse_stem(stem)
    }

    /// Parses a sampled image name (`<stem>.<ext>`).
    pub fn parse_image_file_name(file_name: &str) -> Result<Self, Error> {
        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .ok_or_else(|| Error::FilenameParseFailed(file_name.to_string()))?;
        Self::parse_stem(stem)
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_name_format() {
        let name = FrameName::new("clip", 1, 5);
        assert_eq!(name.image_file_name("jpg"), "clip_frame_0001_00m05s.jpg");
        assert_eq!(name.result_file_name(), "clip_frame_0001_00m05s_analysis.json");
    }

    #[test]
    fn test_minutes_and_seconds_split() {
        let name = FrameName::new("site", 42, 90);
        assert_eq!(name.stem(), "site_frame_0042_01m30s");
    }

    #[test]
    fn test_round_trip_multi_part_video_name() {
        let names = [
            FrameName::new("north_gate_cam_2", 0, 0),
            FrameName::new("clip", 9999, 3599),
            FrameName::new("a", 12, 61),
            FrameName::new("long", 3, 7265),
        ];
        for name in names {
            assert_eq!(FrameName::parse_stem(&name.stem()).unwrap(), name);
            assert_eq!(
                FrameName::parse_result_file_name(&name.result_file_name()).unwrap(),
                name
            );
            assert_eq!(
                FrameName::parse_image_file_name(&name.image_file_name("png")).unwrap(),
                name
            );
        }
    }

    #[test]
    fn test_from_seconds_truncates() {
        assert_eq!(FrameName::from_seconds("v", 0, 5.999).timestamp_secs, 5);
        assert_eq!(FrameName::from_seconds("v", 0, 150.0 / 30.0).timestamp_secs, 5);
        assert_eq!(FrameName::from_seconds("v", 0, 4.9999999).timestamp_secs, 5);
        assert_eq!(FrameName::from_seconds("v", 0, -1.0).timestamp_secs, 0);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "no_token_here",
            "frame_0001_00m05s",
            "clip_frame_abc_00m05s",
            "clip_frame_0001",
            "clip_frame_0001_0005",
            "clip_frame_0001_00m05",
            "clip_frame_0001_xxm05s",
        ] {
            assert!(
                matches!(FrameName::parse_stem(bad), Err(Error::FilenameParseFailed(_))),
                "expected failure for {}",
                bad
            );
        }
        assert!(FrameName::parse_result_file_name("clip_frame_0001_00m05s.json").is_err());
    }

    #[test]
    fn test_first_frame_token_wins() {
        let parsed = FrameName::parse_stem("clip_frame_0002_00m10s_extra").unwrap();
        assert_eq!(parsed, FrameName::new("clip", 2, 10));
    }
}
