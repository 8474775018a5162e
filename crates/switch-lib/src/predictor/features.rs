//! Feature extraction for quality-switch inference
//!
//! Maps a validated [`SwitchCandidate`] to the fixed, ordered feature vector
//! shared by the heuristic, the learned model and the training pipeline.
//! Changing the order or the meaning of any slot requires bumping
//! [`SCHEMA_VERSION`] and retraining.

use crate::models::SwitchCandidate;
use serde::{Deserialize, Serialize};

/// Feature schema version understood by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Number of features in schema v1
pub const NUM_FEATURES: usize = 21;

/// Seconds of media the load-time estimate prefetches
pub const PREFETCH_SECONDS: f64 = 5.0;

/// Seconds needed to prefetch five seconds of the target rendition.
///
/// `target_bitrate_bps` is in bits per second, `network_speed_mbytes` in
/// megabytes per second: `(kbps * 5) / (MBps * 8000)`.
pub fn estimated_load_time(target_bitrate_bps: f64, network_speed_mbytes: f64) -> f64 {
    let target_kbps = target_bitrate_bps / 1000.0;
    let required_kilobits = target_kbps * PREFETCH_SECONDS;
    let network_kbps = network_speed_mbytes * 8.0 * 1000.0;
    required_kilobits / network_kbps
}

/// Slots of the schema v1 feature vector, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    NetworkSpeed,
    NetworkBandwidth,
    Rtt,
    Jitter,
    PacketLoss,
    DownlinkStdDev,
    QualityDelta,
    BitrateRatio,
    TargetBitrate,
    EstimatedLoadTime,
    BufferedSeconds,
    VideoLoadPercentile,
    AudioLoadPercentile,
    DevicePixelRatio,
    ScreenMegapixels,
    DeviceClass,
    TargetMegapixels,
    Progress,
    DropRate,
    AvgDecodeTime,
    ActivityScore,
}

impl Feature {
    pub const ALL: [Feature; NUM_FEATURES] = [
        Feature::NetworkSpeed,
        Feature::NetworkBandwidth,
        Feature::Rtt,
        Feature::Jitter,
        Feature::PacketLoss,
        Feature::DownlinkStdDev,
        Feature::QualityDelta,
        Feature::BitrateRatio,
        Feature::TargetBitrate,
        Feature::EstimatedLoadTime,
        Feature::BufferedSeconds,
        Feature::VideoLoadPercentile,
        Feature::AudioLoadPercentile,
        Feature::DevicePixelRatio,
        Feature::ScreenMegapixels,
        Feature::DeviceClass,
        Feature::TargetMegapixels,
        Feature::Progress,
        Feature::DropRate,
        Feature::AvgDecodeTime,
        Feature::ActivityScore,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::NetworkSpeed => "network_speed",
            Feature::NetworkBandwidth => "network_bandwidth",
            Feature::Rtt => "rtt",
            Feature::Jitter => "jitter",
            Feature::PacketLoss => "packet_loss",
            Feature::DownlinkStdDev => "downlink_std_dev",
            Feature::QualityDelta => "quality_delta",
            Feature::BitrateRatio => "bitrate_ratio",
            Feature::TargetBitrate => "target_bitrate",
            Feature::EstimatedLoadTime => "estimated_load_time",
            Feature::BufferedSeconds => "buffered_seconds",
            Feature::VideoLoadPercentile => "video_load_percentile",
            Feature::AudioLoadPercentile => "audio_load_percentile",
            Feature::DevicePixelRatio => "device_pixel_ratio",
            Feature::ScreenMegapixels => "screen_megapixels",
            Feature::DeviceClass => "device_class",
            Feature::TargetMegapixels => "target_megapixels",
            Feature::Progress => "progress",
            Feature::DropRate => "drop_rate",
            Feature::AvgDecodeTime => "avg_decode_time",
            Feature::ActivityScore => "activity_score",
        }
    }
}

/// Ordered, fixed-length model input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: [f32; NUM_FEATURES],
}

impl FeatureVector {
    pub fn from_values(values: [f32; NUM_FEATURES]) -> Self {
        Self { values }
    }

    pub fn get(&self, feature: Feature) -> f32 {
        self.values[feature.index()]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn schema_version(&self) -> u32 {
        SCHEMA_VERSION
    }

    /// First slot holding NaN or an infinity, if any
    pub fn first_non_finite(&self) -> Option<Feature> {
        Feature::ALL
            .iter()
            .copied()
            .find(|f| !self.values[f.index()].is_finite())
    }

    /// (name, value) pairs in schema order
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        Feature::ALL.iter().map(move |f| (f.name(), self.get(*f)))
    }
}

/// Build the schema v1 feature vector for a candidate.
///
/// Pure: identical candidates always produce bit-identical vectors.
pub fn build_feature_vector(candidate: &SwitchCandidate) -> FeatureVector {
    let network = &candidate.network;
    let buffer = &candidate.buffer;
    let device = &candidate.device;
    let playback = &candidate.playback;

    let bandwidth = match network.network_bandwidth {
        Some(b) if b > 0.0 => b,
        _ => network.network_speed,
    };
    let screen_megapixels = device.screen_width as f64 * device.screen_height as f64 / 1e6;
    let progress = playback.current_time / playback.duration.max(1.0);
    let drop_rate = playback.dropped_frames as f64 / playback.total_frames.max(1) as f64;

    let mut values = [0.0f32; NUM_FEATURES];
    let mut set = |feature: Feature, value: f64| values[feature.index()] = value as f32;

    set(Feature::NetworkSpeed, network.network_speed);
    set(Feature::NetworkBandwidth, bandwidth);
    set(Feature::Rtt, network.rtt);
    set(Feature::Jitter, network.jitter);
    set(Feature::PacketLoss, network.packet_loss);
    set(Feature::DownlinkStdDev, network.downlink_std_dev);
    set(Feature::QualityDelta, candidate.quality_delta() as f64);
    set(Feature::BitrateRatio, candidate.bitrate_ratio());
    set(Feature::TargetBitrate, candidate.target_bitrate);
    set(
        Feature::EstimatedLoadTime,
        estimated_load_time(candidate.target_bitrate, network.network_speed),
    );
    set(Feature::BufferedSeconds, buffer.buffered_seconds);
    set(Feature::VideoLoadPercentile, buffer.video_load_percentile);
    set(Feature::AudioLoadPercentile, buffer.audio_load_percentile);
    set(Feature::DevicePixelRatio, device.device_pixel_ratio);
    set(Feature::ScreenMegapixels, screen_megapixels);
    set(Feature::DeviceClass, device.device_class.ordinal() as f64);
    set(Feature::TargetMegapixels, candidate.target_resolution / 1e6);
    set(Feature::Progress, progress);
    set(Feature::DropRate, drop_rate);
    set(Feature::AvgDecodeTime, playback.avg_decode_time);
    set(Feature::ActivityScore, playback.cv_activity_score);

    FeatureVector { values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SwitchProbe;
    use crate::test_support::full_probe;

    #[test]
    fn test_schema_order_matches_indices() {
        for (i, feature) in Feature::ALL.iter().enumerate() {
            assert_eq!(feature.index(), i, "{} out of place", feature.name());
        }
    }

    #[test]
    fn test_estimated_load_time_units() {
        // 2 Mbps target over 5 MBps: 10_000 kbit / 40_000 kbps
        assert!((estimated_load_time(2_000_000.0, 5.0) - 0.25).abs() < 1e-12);
        // 8 Mbps target over 1 MBps: 40_000 kbit / 8_000 kbps
        assert!((estimated_load_time(8_000_000.0, 1.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_golden_vector() {
        let candidate = full_probe().validate().unwrap();
        let fv = build_feature_vector(&candidate);

        let expected: [f32; NUM_FEATURES] = [
            5.0,                          // network_speed
            40.0,                         // network_bandwidth
            50.0,                         // rtt
            4.0,                          // jitter
            0.01,                         // packet_loss
            0.5,                          // downlink_std_dev
            1.0,                          // quality_delta
            (2_000_000.0f64 / 1_500_000.0) as f32,
            2_000_000.0,                  // target_bitrate
            0.25,                         // estimated_load_time
            22.0,                         // buffered_seconds
            0.4,                          // video_load_percentile
            0.5,                          // audio_load_percentile
            2.0,                          // device_pixel_ratio
            (1440.0f64 * 900.0 / 1e6) as f32,
            2.0,                          // device_class
            (1920.0f64 * 1080.0 / 1e6) as f32,
            0.1,                          // progress
            0.01,                         // drop_rate
            3.5,                          // avg_decode_time
            0.3,                          // activity_score
        ];

        assert_eq!(fv.as_slice(), &expected[..]);
    }

    #[test]
    fn test_deterministic() {
        let candidate = full_probe().validate().unwrap();
        let a = build_feature_vector(&candidate);
        let b = build_feature_vector(&candidate.clone());
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_bandwidth_falls_back_to_speed() {
        let probe = SwitchProbe {
            network_bandwidth: None,
            ..full_probe()
        };
        let fv = build_feature_vector(&probe.validate().unwrap());
        assert_eq!(fv.get(Feature::NetworkBandwidth), 5.0);

        let probe = SwitchProbe {
            network_bandwidth: Some(0.0),
            ..full_probe()
        };
        let fv = build_feature_vector(&probe.validate().unwrap());
        assert_eq!(fv.get(Feature::NetworkBandwidth), 5.0);
    }

    #[test]
    fn test_zero_duration_and_frames_guarded() {
        let probe = SwitchProbe {
            current_time: Some(0.5),
            duration: Some(0.0),
            dropped_frames: Some(3),
            total_frames: Some(0),
            ..full_probe()
        };
        let fv = build_feature_vector(&probe.validate().unwrap());
        assert_eq!(fv.get(Feature::Progress), 0.5);
        assert_eq!(fv.get(Feature::DropRate), 3.0);
        assert!(fv.first_non_finite().is_none());
    }

    #[test]
    fn test_downgrade_delta_negative() {
        let probe = SwitchProbe {
            original_quality_index: Some(4),
            target_quality_index: Some(2),
            ..full_probe()
        };
        let fv = build_feature_vector(&probe.validate().unwrap());
        assert_eq!(fv.get(Feature::QualityDelta), -2.0);
    }

    #[test]
    fn test_named_iteration() {
        let fv = build_feature_vector(&full_probe().validate().unwrap());
        let names: Vec<_> = fv.named().map(|(n, _)| n).collect();
        assert_eq!(names.len(), NUM_FEATURES);
        assert_eq!(names[0], "network_speed");
        assert_eq!(names[NUM_FEATURES - 1], "activity_score");
    }
}
