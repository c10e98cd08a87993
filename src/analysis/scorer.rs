//! Key result scoring.
//!
//! Pure functions turning a group's raw actuals into per-KR scores, a
//! weighted overall score and a status. Every numeric edge case has a
//! defined score; only malformed weight sets are errors.

use crate::error::ConfigError;
use crate::models::{KeyResultSet, KrDirection, OkrStatus, WEIGHT_EPSILON};
use std::collections::BTreeMap;

/// Score of a single key result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrScore {
    /// 0 to 100.
    pub score: f64,
    /// Input was anomalous (e.g. a non-zero actual against a zero baseline).
    pub low_confidence: bool,
}

impl KrScore {
    fn confident(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 100.0),
            low_confidence: false,
        }
    }

    fn anomalous(score: f64) -> Self {
        Self {
            score,
            low_confidence: true,
        }
    }
}

/// Score one key result.
///
/// `reference` is the baseline for minimize-to-zero key results and the
/// target for maximize-to-threshold ones.
pub fn compute_kr_score(actual: f64, reference: f64, direction: KrDirection) -> KrScore {
    if !actual.is_finite() || !reference.is_finite() {
        return KrScore::anomalous(0.0);
    }

    match direction {
        KrDirection::MinimizeToZero => {
            if reference == 0.0 {
                if actual == 0.0 {
                    KrScore::confident(100.0)
                } else {
                    KrScore::anomalous(0.0)
                }
            } else {
                KrScore::confident(100.0 * (1.0 - actual / reference))
            }
        }
        KrDirection::MaximizeToThreshold => {
            if reference == 0.0 {
                KrScore::confident(100.0)
            } else {
                KrScore::confident(100.0 * actual / reference)
            }
        }
    }
}

/// Weighted sum of key result scores.
pub fn compute_overall(kr_scores: &[f64], weights: &[f64]) -> Result<f64, ConfigError> {
    if kr_scores.len() != weights.len() {
        return Err(ConfigError::WeightCount {
            scores: kr_scores.len(),
            weights: weights.len(),
        });
    }

    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_EPSILON {
        return Err(ConfigError::WeightSum { sum });
    }

    Ok(kr_scores
        .iter()
        .zip(weights)
        .map(|(score, weight)| score * weight)
        .sum())
}

/// Lower bounds of the status bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusThresholds {
    on_track_min: f64,
    caution_min: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            on_track_min: 80.0,
            caution_min: 60.0,
        }
    }
}

impl StatusThresholds {
    pub fn new(on_track_min: f64, caution_min: f64) -> Result<Self, ConfigError> {
        if !on_track_min.is_finite() || !caution_min.is_finite() || caution_min > on_track_min {
            return Err(ConfigError::InvalidThresholds {
                on_track_min,
                caution_min,
            });
        }
        Ok(Self {
            on_track_min,
            caution_min,
        })
    }

    /// Classify an overall score. Lower bounds are inclusive.
    pub fn classify(&self, overall_score: f64) -> OkrStatus {
        if overall_score >= self.on_track_min {
            OkrStatus::OnTrack
        } else if overall_score >= self.caution_min {
            OkrStatus::Caution
        } else {
            OkrStatus::AtRisk
        }
    }
}

/// Classify with the default 80/60 bands.
pub fn classify_status(overall_score: f64) -> OkrStatus {
    StatusThresholds::default().classify(overall_score)
}

/// Scores for one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupScore {
    pub per_kr_scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub status: OkrStatus,
    pub low_confidence: bool,
}

/// Scores groups against a set of key results.
#[derive(Debug, Clone, Copy)]
pub struct Scorer<'a> {
    thresholds: &'a StatusThresholds,
}

impl<'a> Scorer<'a> {
    pub fn new(thresholds: &'a StatusThresholds) -> Self {
        Self { thresholds }
    }

    pub fn classify(&self, overall_score: f64) -> OkrStatus {
        self.thresholds.classify(overall_score)
    }

    /// Score one group's actuals.
    ///
    /// `baselines` holds the per-KR baseline used when a minimize-to-zero
    /// key result has none configured; missing actuals score as 0.
    pub fn score_group(
        &self,
        key_results: &KeyResultSet,
        actuals: &BTreeMap<String, f64>,
        baselines: &BTreeMap<String, f64>,
    ) -> Result<GroupScore, ConfigError> {
        let mut per_kr_scores = BTreeMap::new();
        let mut scores = Vec::with_capacity(key_results.len());
        let mut low_confidence = false;

        for kr in key_results.iter() {
            let actual = actuals.get(&kr.id).copied().unwrap_or(0.0);
            let reference = match kr.direction {
                KrDirection::MinimizeToZero => kr
                    .baseline
                    .or_else(|| baselines.get(&kr.id).copied())
                    .unwrap_or(0.0),
                KrDirection::MaximizeToThreshold => kr.target_value,
            };

            let kr_score = compute_kr_score(actual, reference, kr.direction);
            low_confidence |= kr_score.low_confidence;
            per_kr_scores.insert(kr.id.clone(), kr_score.score);
            scores.push(kr_score.score);
        }

        let overall_score = compute_overall(&scores, &key_results.weights())?;

        Ok(GroupScore {
            per_kr_scores,
            overall_score,
            status: self.classify(overall_score),
            low_confidence,
        })
    }

    /// Every key result vacuously satisfied; used for empty groups.
    pub fn perfect(&self, key_results: &KeyResultSet) -> GroupScore {
        let per_kr_scores = key_results
            .iter()
            .map(|kr| (kr.id.clone(), 100.0))
            .collect();
        GroupScore {
            per_kr_scores,
            overall_score: 100.0,
            status: self.classify(100.0),
            low_confidence: true,
        }
    }
}
