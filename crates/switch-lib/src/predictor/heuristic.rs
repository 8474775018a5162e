//! Deterministic rule chain used whenever no learned model is available
//!
//! Rules run in a fixed order and the first failing rule decides the
//! outcome. Confidence values are calibration constants, not probabilities:
//! rejections land in `[0.2, 0.5]` depending on how close the candidate came
//! to passing, approvals get a flat 0.70.

use super::features::{Feature, FeatureVector};
use crate::models::SwitchPrediction;

/// Tuning constants for the rule chain
#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    /// Largest allowed |quality delta| for a single switch
    pub max_quality_jump: f32,
    /// Largest target/original bitrate ratio for an upgrade
    pub max_upgrade_bitrate_ratio: f32,
    pub min_buffer_upgrade_secs: f32,
    pub min_buffer_downgrade_secs: f32,
    /// Required throughput as a multiple of the target bitrate
    pub bandwidth_safety_margin: f32,
    /// Highest dropped-frame rate tolerated before an upgrade
    pub max_upgrade_drop_rate: f32,
    /// Multiplier applied to the estimated load time
    pub load_time_safety_factor: f32,
    pub min_switch_time_secs: f32,
    pub max_upgrade_switch_time_secs: f32,
    pub approve_confidence: f64,
    pub reject_confidence_floor: f64,
    pub reject_confidence_span: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            max_quality_jump: 2.0,
            max_upgrade_bitrate_ratio: 3.0,
            min_buffer_upgrade_secs: 20.0,
            min_buffer_downgrade_secs: 10.0,
            bandwidth_safety_margin: 2.0,
            max_upgrade_drop_rate: 0.05,
            load_time_safety_factor: 1.5,
            min_switch_time_secs: 0.3,
            max_upgrade_switch_time_secs: 2.5,
            approve_confidence: 0.70,
            reject_confidence_floor: 0.2,
            reject_confidence_span: 0.3,
        }
    }
}

/// Rule that rejected a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicRule {
    InvalidInput,
    QualityJump,
    BitrateRatio,
    Buffer,
    Bandwidth,
    DropRate,
    SwitchTime,
}

/// Full verdict, including which rule fired
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicDecision {
    pub rejected_by: Option<HeuristicRule>,
    pub prediction: SwitchPrediction,
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicPredictor {
    config: HeuristicConfig,
}

impl HeuristicPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HeuristicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    pub fn predict(&self, features: &FeatureVector) -> SwitchPrediction {
        self.evaluate(features).prediction
    }

    pub fn evaluate(&self, features: &FeatureVector) -> HeuristicDecision {
        let c = &self.config;
        let delta = features.get(Feature::QualityDelta);
        let upgrade = delta > 0.0;
        let expected_time = (features.get(Feature::EstimatedLoadTime) * c.load_time_safety_factor)
            .max(c.min_switch_time_secs);

        if let Some(feature) = features.first_non_finite() {
            return self.reject(
                HeuristicRule::InvalidInput,
                0.0,
                expected_time,
                format!("feature `{}` is not finite", feature.name()),
            );
        }

        if delta.abs() > c.max_quality_jump {
            return self.reject(
                HeuristicRule::QualityJump,
                c.max_quality_jump / delta.abs(),
                expected_time,
                format!(
                    "quality jump of {} levels exceeds {}",
                    delta, c.max_quality_jump
                ),
            );
        }

        let ratio = features.get(Feature::BitrateRatio);
        if upgrade && ratio > c.max_upgrade_bitrate_ratio {
            return self.reject(
                HeuristicRule::BitrateRatio,
                c.max_upgrade_bitrate_ratio / ratio,
                expected_time,
                format!(
                    "bitrate ratio {:.2} exceeds {} for an upgrade",
                    ratio, c.max_upgrade_bitrate_ratio
                ),
            );
        }

        let buffered = features.get(Feature::BufferedSeconds);
        let min_buffer = if upgrade {
            c.min_buffer_upgrade_secs
        } else {
            c.min_buffer_downgrade_secs
        };
        if buffered < min_buffer {
            return self.reject(
                HeuristicRule::Buffer,
                buffered / min_buffer,
                expected_time,
                format!("buffer {:.1}s below {}s", buffered, min_buffer),
            );
        }

        // MBps -> Mbps, bps -> Mbps
        let speed_mbps = features.get(Feature::NetworkSpeed) * 8.0;
        let required_mbps =
            c.bandwidth_safety_margin * features.get(Feature::TargetBitrate) / 1_000_000.0;
        if speed_mbps < required_mbps {
            return self.reject(
                HeuristicRule::Bandwidth,
                speed_mbps / required_mbps,
                expected_time,
                format!(
                    "network {:.2} Mbps below {:.2} Mbps required",
                    speed_mbps, required_mbps
                ),
            );
        }

        let drop_rate = features.get(Feature::DropRate);
        if upgrade && drop_rate > c.max_upgrade_drop_rate {
            return self.reject(
                HeuristicRule::DropRate,
                c.max_upgrade_drop_rate / drop_rate,
                expected_time,
                format!(
                    "drop rate {:.1}% above {:.1}%",
                    drop_rate * 100.0,
                    c.max_upgrade_drop_rate * 100.0
                ),
            );
        }

        if upgrade && expected_time > c.max_upgrade_switch_time_secs {
            return self.reject(
                HeuristicRule::SwitchTime,
                c.max_upgrade_switch_time_secs / expected_time,
                expected_time,
                format!(
                    "expected switch time {:.2}s exceeds {}s",
                    expected_time, c.max_upgrade_switch_time_secs
                ),
            );
        }

        HeuristicDecision {
            rejected_by: None,
            prediction: SwitchPrediction {
                should_switch: true,
                confidence: c.approve_confidence,
                expected_switch_time: Some(expected_time as f64),
                used_ml: false,
                reason: Some("all heuristic checks passed".to_string()),
            },
        }
    }

    fn reject(
        &self,
        rule: HeuristicRule,
        closeness: f32,
        expected_time: f32,
        reason: String,
    ) -> HeuristicDecision {
        HeuristicDecision {
            rejected_by: Some(rule),
            prediction: SwitchPrediction {
                should_switch: false,
                confidence: self.marginal_confidence(closeness),
                expected_switch_time: Some(expected_time as f64).filter(|t| t.is_finite()),
                used_ml: false,
                reason: Some(reason),
            },
        }
    }

    /// Near-misses score toward the top of the rejection band
    fn marginal_confidence(&self, closeness: f32) -> f64 {
        let closeness = if closeness.is_nan() {
            0.0
        } else {
            closeness.clamp(0.0, 1.0) as f64
        };
        self.config.reject_confidence_floor + self.config.reject_confidence_span * closeness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SwitchProbe;
    use crate::predictor::features::{build_feature_vector, NUM_FEATURES};
    use crate::test_support::full_probe;

    fn evaluate(probe: SwitchProbe) -> HeuristicDecision {
        let fv = build_feature_vector(&probe.validate().unwrap());
        HeuristicPredictor::new().evaluate(&fv)
    }

    #[test]
    fn test_all_rules_pass() {
        let probe = SwitchProbe {
            original_quality_index: Some(2),
            target_quality_index: Some(3),
            original_bitrate: Some(1_500_000.0),
            target_bitrate: Some(2_000_000.0),
            network_speed: Some(5.0),
            buffered_seconds: Some(22.0),
            dropped_frames: Some(1),
            total_frames: Some(100),
            ..full_probe()
        };
        let decision = evaluate(probe);
        assert_eq!(decision.rejected_by, None);
        assert!(decision.prediction.should_switch);
        assert_eq!(decision.prediction.confidence, 0.70);
        assert!(!decision.prediction.used_ml);
        let expected = decision.prediction.expected_switch_time.unwrap();
        assert!((expected - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_jump_checked_before_ratio() {
        let probe = SwitchProbe {
            original_quality_index: Some(1),
            target_quality_index: Some(4),
            original_bitrate: Some(1_000_000.0),
            target_bitrate: Some(8_000_000.0),
            network_speed: Some(1.0),
            buffered_seconds: Some(25.0),
            ..full_probe()
        };
        let decision = evaluate(probe);
        assert_eq!(decision.rejected_by, Some(HeuristicRule::QualityJump));
        assert!(!decision.prediction.should_switch);
        // 0.2 + 0.3 * 2/3
        assert!((decision.prediction.confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_large_jumps_always_rejected() {
        for (from, to) in [(0, 3), (5, 1), (0, 8), (9, 0), (2, 5)] {
            let probe = SwitchProbe {
                original_quality_index: Some(from),
                target_quality_index: Some(to),
                ..full_probe()
            };
            let decision = evaluate(probe);
            assert!(!decision.prediction.should_switch, "{} -> {}", from, to);
            assert_eq!(decision.rejected_by, Some(HeuristicRule::QualityJump));
        }
    }

    #[test]
    fn test_bitrate_ratio_only_limits_upgrades() {
        let upgrade = SwitchProbe {
            original_bitrate: Some(500_000.0),
            target_bitrate: Some(2_000_000.0),
            ..full_probe()
        };
        assert_eq!(evaluate(upgrade).rejected_by, Some(HeuristicRule::BitrateRatio));

        let downgrade = SwitchProbe {
            original_quality_index: Some(3),
            target_quality_index: Some(2),
            original_bitrate: Some(2_000_000.0),
            target_bitrate: Some(500_000.0),
            ..full_probe()
        };
        assert_eq!(evaluate(downgrade).rejected_by, None);
    }

    #[test]
    fn test_buffer_thresholds_by_direction() {
        let upgrade = SwitchProbe {
            buffered_seconds: Some(15.0),
            ..full_probe()
        };
        let decision = evaluate(upgrade);
        assert_eq!(decision.rejected_by, Some(HeuristicRule::Buffer));
        // 0.2 + 0.3 * 15/20
        assert!((decision.prediction.confidence - 0.425).abs() < 1e-6);

        let downgrade = SwitchProbe {
            original_quality_index: Some(3),
            target_quality_index: Some(2),
            original_bitrate: Some(2_000_000.0),
            target_bitrate: Some(1_500_000.0),
            buffered_seconds: Some(15.0),
            ..full_probe()
        };
        assert_eq!(evaluate(downgrade).rejected_by, None);

        let starving = SwitchProbe {
            original_quality_index: Some(3),
            target_quality_index: Some(2),
            original_bitrate: Some(2_000_000.0),
            target_bitrate: Some(1_500_000.0),
            buffered_seconds: Some(0.0),
            ..full_probe()
        };
        let decision = evaluate(starving);
        assert_eq!(decision.rejected_by, Some(HeuristicRule::Buffer));
        assert_eq!(decision.prediction.confidence, 0.2);
    }

    #[test]
    fn test_bandwidth_margin() {
        // 0.4 MBps = 3.2 Mbps, needs 2 * 2 Mbps
        let probe = SwitchProbe {
            network_speed: Some(0.4),
            ..full_probe()
        };
        let decision = evaluate(probe);
        assert_eq!(decision.rejected_by, Some(HeuristicRule::Bandwidth));
        assert!((decision.prediction.confidence - (0.2 + 0.3 * 0.8)).abs() < 1e-6);

        // exactly 4 Mbps passes
        let probe = SwitchProbe {
            network_speed: Some(0.5),
            ..full_probe()
        };
        assert_ne!(evaluate(probe).rejected_by, Some(HeuristicRule::Bandwidth));
    }

    #[test]
    fn test_drop_rate_blocks_upgrade() {
        let probe = SwitchProbe {
            dropped_frames: Some(100),
            total_frames: Some(1000),
            ..full_probe()
        };
        let decision = evaluate(probe);
        assert_eq!(decision.rejected_by, Some(HeuristicRule::DropRate));
        assert!((decision.prediction.confidence - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_switch_time_blocks_slow_upgrade() {
        // earlier rules pass, load estimate 2s -> expected 3s
        let mut values = [0.0f32; NUM_FEATURES];
        values[Feature::QualityDelta.index()] = 1.0;
        values[Feature::BitrateRatio.index()] = 1.5;
        values[Feature::BufferedSeconds.index()] = 30.0;
        values[Feature::NetworkSpeed.index()] = 10.0;
        values[Feature::TargetBitrate.index()] = 3_000_000.0;
        values[Feature::EstimatedLoadTime.index()] = 2.0;
        let decision = HeuristicPredictor::new().evaluate(&FeatureVector::from_values(values));
        assert_eq!(decision.rejected_by, Some(HeuristicRule::SwitchTime));
        assert_eq!(decision.prediction.expected_switch_time, Some(3.0));
    }

    #[test]
    fn test_switch_time_ignored_for_downgrade() {
        let mut values = [0.0f32; NUM_FEATURES];
        values[Feature::QualityDelta.index()] = -1.0;
        values[Feature::BitrateRatio.index()] = 0.5;
        values[Feature::BufferedSeconds.index()] = 12.0;
        values[Feature::NetworkSpeed.index()] = 10.0;
        values[Feature::TargetBitrate.index()] = 1_000_000.0;
        values[Feature::EstimatedLoadTime.index()] = 4.0;
        let decision = HeuristicPredictor::new().evaluate(&FeatureVector::from_values(values));
        assert_eq!(decision.rejected_by, None);
    }

    #[test]
    fn test_minimum_expected_time() {
        let probe = SwitchProbe {
            network_speed: Some(100.0),
            ..full_probe()
        };
        let prediction = evaluate(probe).prediction;
        assert_eq!(prediction.expected_switch_time, Some(0.3f32 as f64));
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let mut values = [1.0f32; NUM_FEATURES];
        values[Feature::BufferedSeconds.index()] = f32::NAN;
        let decision = HeuristicPredictor::new().evaluate(&FeatureVector::from_values(values));
        assert_eq!(decision.rejected_by, Some(HeuristicRule::InvalidInput));
        assert_eq!(decision.prediction.confidence, 0.2);
    }

    #[test]
    fn test_rejection_confidence_band() {
        let predictor = HeuristicPredictor::new();
        for closeness in [-1.0, 0.0, 0.5, 1.0, 4.0, f32::NAN] {
            let c = predictor.marginal_confidence(closeness);
            assert!((0.2..=0.5).contains(&c), "closeness {} gave {}", closeness, c);
        }
    }
}
