//! Core data models for quality-switch decisions
//!
//! `SwitchProbe` is the loosely-typed shape produced by the player's
//! network/device probes. It is validated once, at the boundary, into a
//! `SwitchCandidate`; everything downstream works on the validated type.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Network quality ordinal used when the probe label is missing or unknown
pub const DEFAULT_NETWORK_QUALITY: u8 = 2;

/// Errors raised while validating raw probe data
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandidateError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("target quality index {0} equals the original index")]
    SameQuality(i32),

    #[error("`{field}` must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("`{field}` = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("`{0}` is not a finite number")]
    NonFinite(&'static str),
}

/// Coarse device class, ordinal-encoded for the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    pub fn ordinal(self) -> u8 {
        match self {
            DeviceClass::Mobile => 0,
            DeviceClass::Tablet => 1,
            DeviceClass::Desktop => 2,
        }
    }

    /// Map a probe label; unknown labels count as mobile.
    pub fn from_label(label: &str) -> Self {
        match label {
            "desktop" => DeviceClass::Desktop,
            "tablet" => DeviceClass::Tablet,
            _ => DeviceClass::Mobile,
        }
    }

    /// Infer the class from the CSS screen width when no label is available
    pub fn from_screen_width(width: u32) -> Self {
        if width < 768 {
            DeviceClass::Mobile
        } else if width < 1024 {
            DeviceClass::Tablet
        } else {
            DeviceClass::Desktop
        }
    }
}

/// Map the player's network quality label to the 0-4 ordinal
pub fn network_quality_ordinal(label: Option<&str>) -> u8 {
    match label {
        Some("Very Good") => 4,
        Some("Good") => 3,
        Some("Average") => 2,
        Some("Bad") => 1,
        Some("Very Bad") => 0,
        None | Some("") => DEFAULT_NETWORK_QUALITY,
        Some(other) => {
            warn!(
                label = %other,
                fallback = DEFAULT_NETWORK_QUALITY,
                "Unrecognized network quality label"
            );
            DEFAULT_NETWORK_QUALITY
        }
    }
}

/// Network conditions at decision time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    /// Measured throughput in megabytes per second
    pub network_speed: f64,
    /// Reported bandwidth in megabits per second, if the platform exposes it
    pub network_bandwidth: Option<f64>,
    /// Round-trip time in milliseconds
    pub rtt: f64,
    /// Jitter in milliseconds
    pub jitter: f64,
    /// Packet loss as a fraction in [0, 1]
    pub packet_loss: f64,
    pub downlink_std_dev: f64,
    /// Discretized quality, 0 (very bad) to 4 (very good)
    pub network_quality: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferSnapshot {
    pub buffered_seconds: f64,
    pub video_load_percentile: f64,
    pub audio_load_percentile: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub device_pixel_ratio: f64,
    pub screen_width: u32,
    pub screen_height: u32,
    pub device_class: DeviceClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub current_time: f64,
    pub duration: f64,
    pub dropped_frames: u64,
    pub total_frames: u64,
    /// Average frame decode time in milliseconds
    pub avg_decode_time: f64,
    pub cv_activity_score: f64,
}

/// A validated, proposed rendition change
///
/// Serializes flat (camelCase) so telemetry records keep the field names the
/// training pipeline expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCandidate {
    pub original_quality_index: i32,
    pub target_quality_index: i32,
    /// Bits per second
    pub original_bitrate: f64,
    /// Bits per second
    pub target_bitrate: f64,
    /// Pixel area
    pub original_resolution: f64,
    /// Pixel area
    pub target_resolution: f64,
    #[serde(flatten)]
    pub network: NetworkSnapshot,
    #[serde(flatten)]
    pub buffer: BufferSnapshot,
    #[serde(flatten)]
    pub device: DeviceSnapshot,
    #[serde(flatten)]
    pub playback: PlaybackSnapshot,
}

impl SwitchCandidate {
    pub fn quality_delta(&self) -> i32 {
        self.target_quality_index - self.original_quality_index
    }

    pub fn is_upgrade(&self) -> bool {
        self.quality_delta() > 0
    }

    pub fn bitrate_ratio(&self) -> f64 {
        self.target_bitrate / self.original_bitrate
    }
}

/// Raw probe data as supplied by the player
///
/// Every field is optional so partially sampled probes deserialize; required
/// fields are enforced by [`SwitchProbe::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchProbe {
    pub original_quality_index: Option<i32>,
    pub target_quality_index: Option<i32>,
    pub original_bitrate: Option<f64>,
    pub target_bitrate: Option<f64>,
    pub original_resolution: Option<f64>,
    pub target_resolution: Option<f64>,
    pub network_speed: Option<f64>,
    pub network_bandwidth: Option<f64>,
    pub rtt: Option<f64>,
    pub jitter: Option<f64>,
    pub packet_loss: Option<f64>,
    pub downlink_std_dev: Option<f64>,
    pub network_quality: Option<String>,
    pub buffered_seconds: Option<f64>,
    pub video_load_percentile: Option<f64>,
    pub audio_load_percentile: Option<f64>,
    pub device_pixel_ratio: Option<f64>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub device_type: Option<String>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    pub dropped_frames: Option<u64>,
    pub total_frames: Option<u64>,
    pub avg_decode_time: Option<f64>,
    pub cv_activity_score: Option<f64>,
}

impl SwitchProbe {
    /// Validate field presence and numeric ranges, producing a candidate
    pub fn validate(&self) -> Result<SwitchCandidate, CandidateError> {
        let original_quality_index = self
            .original_quality_index
            .ok_or(CandidateError::MissingField("originalQualityIndex"))?;
        let target_quality_index = self
            .target_quality_index
            .ok_or(CandidateError::MissingField("targetQualityIndex"))?;
        if original_quality_index == target_quality_index {
            return Err(CandidateError::SameQuality(target_quality_index));
        }

        let original_bitrate = positive(
            required(self.original_bitrate, "originalBitrate")?,
            "originalBitrate",
        )?;
        let target_bitrate =
            positive(required(self.target_bitrate, "targetBitrate")?, "targetBitrate")?;
        let network_speed =
            positive(required(self.network_speed, "networkSpeed")?, "networkSpeed")?;
        let buffered_seconds = at_least_zero(
            required(self.buffered_seconds, "bufferedSeconds")?,
            "bufferedSeconds",
        )?;

        let network_bandwidth = match self.network_bandwidth {
            Some(v) => Some(at_least_zero(v, "networkBandwidth")?),
            None => None,
        };

        let screen_width = self.screen_width.unwrap_or(0);
        let device_class = match self.device_type.as_deref() {
            Some(label) if !label.is_empty() => DeviceClass::from_label(label),
            _ => DeviceClass::from_screen_width(screen_width),
        };

        Ok(SwitchCandidate {
            original_quality_index,
            target_quality_index,
            original_bitrate,
            target_bitrate,
            original_resolution: at_least_zero(
                self.original_resolution.unwrap_or(0.0),
                "originalResolution",
            )?,
            target_resolution: at_least_zero(
                self.target_resolution.unwrap_or(0.0),
                "targetResolution",
            )?,
            network: NetworkSnapshot {
                network_speed,
                network_bandwidth,
                rtt: at_least_zero(self.rtt.unwrap_or(0.0), "rtt")?,
                jitter: at_least_zero(self.jitter.unwrap_or(0.0), "jitter")?,
                packet_loss: fraction(self.packet_loss.unwrap_or(0.0), "packetLoss")?,
                downlink_std_dev: at_least_zero(
                    self.downlink_std_dev.unwrap_or(0.0),
                    "downlinkStdDev",
                )?,
                network_quality: network_quality_ordinal(self.network_quality.as_deref()),
            },
            buffer: BufferSnapshot {
                buffered_seconds,
                video_load_percentile: fraction(
                    self.video_load_percentile.unwrap_or(0.0),
                    "videoLoadPercentile",
                )?,
                audio_load_percentile: fraction(
                    self.audio_load_percentile.unwrap_or(0.0),
                    "audioLoadPercentile",
                )?,
            },
            device: DeviceSnapshot {
                device_pixel_ratio: positive(
                    self.device_pixel_ratio.unwrap_or(1.0),
                    "devicePixelRatio",
                )?,
                screen_width,
                screen_height: self.screen_height.unwrap_or(0),
                device_class,
            },
            playback: PlaybackSnapshot {
                current_time: at_least_zero(self.current_time.unwrap_or(0.0), "currentTime")?,
                duration: at_least_zero(self.duration.unwrap_or(0.0), "duration")?,
                dropped_frames: self.dropped_frames.unwrap_or(0),
                total_frames: self.total_frames.unwrap_or(0),
                avg_decode_time: at_least_zero(
                    self.avg_decode_time.unwrap_or(0.0),
                    "avgDecodeTime",
                )?,
                cv_activity_score: finite(
                    self.cv_activity_score.unwrap_or(0.0),
                    "cvActivityScore",
                )?,
            },
        })
    }
}

impl TryFrom<&SwitchProbe> for SwitchCandidate {
    type Error = CandidateError;

    fn try_from(probe: &SwitchProbe) -> Result<Self, Self::Error> {
        probe.validate()
    }
}

fn required(value: Option<f64>, field: &'static str) -> Result<f64, CandidateError> {
    value.ok_or(CandidateError::MissingField(field))
}

fn finite(value: f64, field: &'static str) -> Result<f64, CandidateError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CandidateError::NonFinite(field))
    }
}

fn positive(value: f64, field: &'static str) -> Result<f64, CandidateError> {
    let value = finite(value, field)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(CandidateError::NonPositive { field, value })
    }
}

fn at_least_zero(value: f64, field: &'static str) -> Result<f64, CandidateError> {
    let value = finite(value, field)?;
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(CandidateError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: f64::INFINITY,
        })
    }
}

fn fraction(value: f64, field: &'static str) -> Result<f64, CandidateError> {
    let value = finite(value, field)?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(CandidateError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

/// Outcome reported by the player once the new rendition played or failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchOutcome {
    pub rebuffered: bool,
    /// Seconds spent stalled after the switch
    pub rebuffer_duration: f64,
    pub dropped_frames_after: u64,
}

/// Decision for a single candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchPrediction {
    pub should_switch: bool,
    /// Calibration score in [0, 1]; heuristic values are not probabilities
    pub confidence: f64,
    /// Expected seconds until the new rendition plays
    pub expected_switch_time: Option<f64>,
    #[serde(rename = "usedML")]
    pub used_ml: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A completed quality switch, as uploaded to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRecord {
    pub session_id: String,
    /// Wall-clock start, Unix milliseconds
    pub timestamp: i64,
    #[serde(flatten)]
    pub candidate: SwitchCandidate,
    /// Monotonic start, milliseconds since the recorder was created
    pub switch_start_time: f64,
    pub switch_end_time: f64,
    /// Milliseconds between start and end
    pub time_to_play: f64,
    pub bitrate_ratio: f64,
    /// Seconds to prefetch five seconds of the target rendition
    pub estimated_load_time: f64,
    pub success: bool,
    pub rebuffered: bool,
    pub rebuffer_duration: f64,
    pub dropped_frames_after: u64,
}
