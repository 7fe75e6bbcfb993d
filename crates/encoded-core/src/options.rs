//! Encode options snapshot carried by every job.
//!
//! Options arrive as a JSON object alongside the upload. Every field has a
//! default, so `{}` (or no options at all) is a valid request.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// x264 presets accepted by `ffmpeg_preset`, fastest first.
pub const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

/// File extensions accepted for subtitle uploads.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "vtt"];

/// Output container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Mov,
}

impl Container {
    /// File extension for outputs in this container.
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Mov => "mov",
        }
    }

    /// MIME type used when serving the output.
    pub fn mime_type(self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Mkv => "video/x-matroska",
            Container::Mov => "video/quicktime",
        }
    }

    /// Whether `-movflags +faststart` applies to this container.
    pub fn supports_faststart(self) -> bool {
        matches!(self, Container::Mp4 | Container::Mov)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Immutable options for a single encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeOptions {
    pub container: Container,
    pub ffmpeg_preset: String,
    pub constant_rate_factor: u8,
    /// Audio bitrate in kbit/s.
    pub audio_bitrate: u32,
    /// Downmix to two channels when true, mono otherwise.
    pub stereo: bool,
    /// Burn the uploaded subtitle into the video stream.
    pub burn_subtitles: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            container: Container::Mp4,
            ffmpeg_preset: "medium".into(),
            constant_rate_factor: 23,
            audio_bitrate: 128,
            stereo: true,
            burn_subtitles: true,
        }
    }
}

impl EncodeOptions {
    /// Parse options from the raw JSON form field. Empty input yields defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| Error::Validation(format!("invalid options: {e}")))
    }

    /// Check that every option is well-formed.
    pub fn validate(&self) -> Result<()> {
        if !X264_PRESETS.contains(&self.ffmpeg_preset.as_str()) {
            return Err(Error::Validation(format!(
                "ffmpeg_preset '{}' is not one of: {}",
                self.ffmpeg_preset,
                X264_PRESETS.join(", ")
            )));
        }
        if self.constant_rate_factor > 51 {
            return Err(Error::Validation(format!(
                "constant_rate_factor must be between 0 and 51, got {}",
                self.constant_rate_factor
            )));
        }
        if !(32..=512).contains(&self.audio_bitrate) {
            return Err(Error::Validation(format!(
                "audio_bitrate must be between 32 and 512 kbps, got {}",
                self.audio_bitrate
            )));
        }
        Ok(())
    }

    /// Number of output audio channels.
    pub fn audio_channels(&self) -> u8 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

/// Lower-cased extension of `file_name`, if it has one.
pub fn file_extension(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_defaults() {
        let opts = EncodeOptions::default();
        assert_eq!(opts.container, Container::Mp4);
        assert_eq!(opts.ffmpeg_preset, "medium");
        assert_eq!(opts.constant_rate_factor, 23);
        assert_eq!(opts.audio_bitrate, 128);
        assert!(opts.stereo);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn empty_json_uses_defaults() {
        assert_eq!(EncodeOptions::from_json("").unwrap(), EncodeOptions::default());
        assert_eq!(EncodeOptions::from_json("{}").unwrap(), EncodeOptions::default());
    }

    #[test]
    fn partial_json_overrides() {
        let opts =
            EncodeOptions::from_json(r#"{"ffmpeg_preset": "fast", "stereo": false}"#).unwrap();
        assert_eq!(opts.ffmpeg_preset, "fast");
        assert_eq!(opts.audio_channels(), 1);
        assert_eq!(opts.constant_rate_factor, 23);
    }

    #[test]
    fn malformed_json_is_validation_error() {
        let err = EncodeOptions::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = EncodeOptions::from_json(r#"{"crf": 20}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let opts = EncodeOptions {
            ffmpeg_preset: "warp".into(),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn crf_out_of_range_is_rejected() {
        let opts = EncodeOptions {
            constant_rate_factor: 52,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn audio_bitrate_bounds() {
        let low = EncodeOptions {
            audio_bitrate: 16,
            ..Default::default()
        };
        assert!(low.validate().is_err());
        let high = EncodeOptions {
            audio_bitrate: 320,
            ..Default::default()
        };
        assert!(high.validate().is_ok());
    }

    #[test]
    fn container_properties() {
        assert_eq!(Container::Mkv.extension(), "mkv");
        assert!(!Container::Mkv.supports_faststart());
        assert_eq!(Container::Mov.mime_type(), "video/quicktime");
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Movie.SRT").as_deref(), Some("srt"));
        assert_eq!(file_extension("noext"), None);
    }
}
