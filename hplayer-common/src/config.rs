//! Player configuration loading and resolution
//!
//! `PlayerConfig` is built once (from compiled defaults or a TOML file) and
//! shared immutably as `Arc<PlayerConfig>` by the Source, every Track and the
//! SyncGateway. Nothing in the engine mutates it after construction.
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `HPLAYER_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/hplayer/config.toml`)
//! 4. Compiled defaults (fallback)

use crate::events::MediaKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HPLAYER_CONFIG";

/// Engine configuration
///
/// Every field has a serde default, so a partial TOML file only overrides
/// what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Decoded audio frames held per audio Track (rounded up to a power of two)
    pub audio_frame_max_count: usize,

    /// Decoded video frames held per video Track (rounded up to a power of two)
    pub video_frame_max_count: usize,

    /// Initial packet queue capacity (the packet queue expands on demand)
    pub packet_queue_capacity: usize,

    /// Restart from zero at end of file
    pub is_loop_play: bool,

    /// Start playback as soon as the source is opened
    pub is_auto_play: bool,

    /// Drop decoded units that end before a seek target
    pub is_accurate_seek: bool,

    /// Resume playback after a seek completes
    pub is_seeked_auto_play: bool,

    /// Let video become playable on the first-frame fast path like audio does
    pub fast_start: bool,

    /// Allow adaptive switching when several video streams exist
    pub video_adaptable: bool,

    /// Ignore video streams entirely
    pub video_disable: bool,

    /// Ignore audio streams entirely
    pub audio_disable: bool,

    /// Use hardware sessions for H.264 when the codec provider supports it
    pub hardware_decode_h264: bool,

    /// Use hardware sessions for H.265 when the codec provider supports it
    pub hardware_decode_h265: bool,

    /// Seconds of loaded media above which the read loop pauses
    pub max_buffer_duration: f64,

    /// Seconds of loaded media needed to report steady-state playability
    pub preferred_forward_buffer_duration: f64,

    /// Minimum interval between two buffering snapshots
    pub snapshot_throttle_ms: u64,

    /// Sample rate audio frames are normalized to
    pub output_sample_rate: u32,

    /// Channel count audio frames are normalized to
    pub output_channels: u16,

    /// Video stream bitrate to prefer when opening (closest match wins)
    pub preferred_video_bit_rate: Option<u64>,

    /// Audio stream bitrate to prefer when no language matches
    pub preferred_audio_bit_rate: Option<u64>,

    /// Audio stream language to prefer (ISO 639 code as reported by the demuxer)
    pub preferred_audio_language: Option<String>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_frame_max_count: 16,
            video_frame_max_count: 8,
            packet_queue_capacity: 256,
            is_loop_play: false,
            is_auto_play: false,
            is_accurate_seek: true,
            is_seeked_auto_play: true,
            fast_start: false,
            video_adaptable: true,
            video_disable: false,
            audio_disable: false,
            hardware_decode_h264: false,
            hardware_decode_h265: true,
            max_buffer_duration: 30.0,
            preferred_forward_buffer_duration: 3.0,
            snapshot_throttle_ms: 100,
            output_sample_rate: 44_100,
            output_channels: 2,
            preferred_video_bit_rate: None,
            preferred_audio_bit_rate: None,
            preferred_audio_language: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading player config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration following the priority order
    ///
    /// A config file that cannot be found is not an error: a warning is
    /// logged and compiled defaults are used. A file that exists but does not
    /// parse or validate is an error.
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) if path.exists() => {
                let config = Self::load(&path)?;
                info!("Loaded player config from {}", path.display());
                Ok(config)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                debug!("No config file located, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.audio_frame_max_count == 0 || self.video_frame_max_count == 0 {
            return Err(Error::Config(
                "frame queue capacities must be greater than zero".to_string(),
            ));
        }
        if self.packet_queue_capacity == 0 {
            return Err(Error::Config(
                "packet_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if !(self.max_buffer_duration > 0.0) || !(self.preferred_forward_buffer_duration > 0.0) {
            return Err(Error::Config(
                "buffer durations must be positive".to_string(),
            ));
        }
        if self.max_buffer_duration < self.preferred_forward_buffer_duration {
            return Err(Error::Config(format!(
                "max_buffer_duration ({}) is below preferred_forward_buffer_duration ({})",
                self.max_buffer_duration, self.preferred_forward_buffer_duration
            )));
        }
        if self.output_sample_rate == 0 || self.output_channels == 0 {
            return Err(Error::Config(
                "output sample rate and channel count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Frame queue capacity for a media kind
    pub fn frame_max_count(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Audio => self.audio_frame_max_count,
            MediaKind::Video => self.video_frame_max_count,
            MediaKind::Subtitle => self.packet_queue_capacity,
        }
    }

    /// Whether hardware decoding is allowed for a codec name
    pub fn can_hardware_decode(&self, codec: &str) -> bool {
        match codec.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "avc1" => self.hardware_decode_h264,
            "h265" | "hevc" | "hvc1" | "hev1" => self.hardware_decode_h265,
            _ => false,
        }
    }

    pub fn snapshot_throttle(&self) -> Duration {
        Duration::from_millis(self.snapshot_throttle_ms)
    }

    /// Index of the video bitrate closest to the preferred one
    pub fn wanted_video(&self, bit_rates: &[u64]) -> Option<usize> {
        let preferred = self.preferred_video_bit_rate?;
        closest_bit_rate(bit_rates.iter().copied(), preferred)
    }

    /// Index of the preferred audio stream among `(bit_rate, language)` pairs
    ///
    /// Language wins over bitrate when both preferences are set.
    pub fn wanted_audio(&self, infos: &[(u64, Option<String>)]) -> Option<usize> {
        if let Some(language) = &self.preferred_audio_language {
            let by_language = infos.iter().position(|(_, lang)| {
                lang.as_deref()
                    .map(|l| l.eq_ignore_ascii_case(language))
                    .unwrap_or(false)
            });
            if by_language.is_some() {
                return by_language;
            }
        }
        let preferred = self.preferred_audio_bit_rate?;
        closest_bit_rate(infos.iter().map(|(rate, _)| *rate), preferred)
    }
}

fn closest_bit_rate(rates: impl Iterator<Item = u64>, preferred: u64) -> Option<usize> {
    rates
        .enumerate()
        .min_by_key(|(_, rate)| rate.abs_diff(preferred))
        .map(|(index, _)| index)
}

/// Locate the config file following the priority order
///
/// Returns `None` when neither an explicit path nor a platform config
/// directory is available.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir().map(|dir| dir.join("hplayer").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio_frame_max_count, 16);
        assert_eq!(config.video_frame_max_count, 8);
        assert_eq!(config.max_buffer_duration, 30.0);
        assert_eq!(config.preferred_forward_buffer_duration, 3.0);
        assert!(config.is_accurate_seek);
        assert!(!config.is_loop_play);
    }

    #[test]
    fn test_partial_toml_overrides_only_named_fields() {
        let config = PlayerConfig::from_toml_str(
            r#"
            is_loop_play = true
            video_frame_max_count = 12

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert!(config.is_loop_play);
        assert_eq!(config.video_frame_max_count, 12);
        assert_eq!(config.audio_frame_max_count, 16);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_inverted_buffer_durations() {
        let result = PlayerConfig::from_toml_str(
            r#"
            max_buffer_duration = 2.0
            preferred_forward_buffer_duration = 5.0
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let config = PlayerConfig {
            audio_frame_max_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let result = PlayerConfig::from_toml_str("is_loop_play = \"sometimes\"");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_hardware_decode_flags_by_codec() {
        let config = PlayerConfig::default();
        assert!(!config.can_hardware_decode("h264"));
        assert!(config.can_hardware_decode("HEVC"));
        assert!(!config.can_hardware_decode("vp9"));
    }

    #[test]
    fn test_wanted_video_picks_closest_bit_rate() {
        let config = PlayerConfig {
            preferred_video_bit_rate: Some(2_100_000),
            ..Default::default()
        };
        assert_eq!(config.wanted_video(&[800_000, 2_000_000, 4_000_000]), Some(1));
        assert_eq!(PlayerConfig::default().wanted_video(&[1, 2]), None);
    }

    #[test]
    fn test_wanted_audio_prefers_language() {
        let config = PlayerConfig {
            preferred_audio_language: Some("fra".to_string()),
            preferred_audio_bit_rate: Some(128_000),
            ..Default::default()
        };
        let infos = vec![
            (128_000, Some("eng".to_string())),
            (96_000, Some("fra".to_string())),
        ];
        assert_eq!(config.wanted_audio(&infos), Some(1));

        let infos = vec![(64_000, None), (128_000, Some("deu".to_string()))];
        assert_eq!(config.wanted_audio(&infos), Some(1));
    }
}
