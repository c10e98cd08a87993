//! Data models for the OKR engine.
//!
//! This module contains the value objects shared by the scorer, aggregator,
//! snapshot archive and trend analyzer, plus the validated key result set.

use crate::error::ConfigError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Tolerance for the key result weight sum.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Dimension value of the organization-wide snapshot.
pub const OVERALL_VALUE: &str = "All";

/// Bucket for entities without a usable dimension value.
pub const UNKNOWN_VALUE: &str = "Unknown";

/// Organizational level a snapshot was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    Overall,
    Country,
    Sdm,
    Site,
}

impl DimensionType {
    /// Dimensions an entity collection can be partitioned by.
    pub const GROUPABLE: [DimensionType; 3] =
        [DimensionType::Country, DimensionType::Sdm, DimensionType::Site];

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionType::Overall => "overall",
            DimensionType::Country => "country",
            DimensionType::Sdm => "sdm",
            DimensionType::Site => "site",
        }
    }
}

impl fmt::Display for DimensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DimensionType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overall" => Ok(DimensionType::Overall),
            "country" => Ok(DimensionType::Country),
            "sdm" => Ok(DimensionType::Sdm),
            "site" | "site location" => Ok(DimensionType::Site),
            other => Err(ConfigError::InvalidDimension(other.to_string())),
        }
    }
}

/// Status of an overall OKR score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OkrStatus {
    OnTrack,
    Caution,
    AtRisk,
}

impl fmt::Display for OkrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OkrStatus::OnTrack => write!(f, "ON TRACK"),
            OkrStatus::Caution => write!(f, "CAUTION"),
            OkrStatus::AtRisk => write!(f, "AT RISK"),
        }
    }
}

impl OkrStatus {
    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            OkrStatus::OnTrack => "🟢",
            OkrStatus::Caution => "🟡",
            OkrStatus::AtRisk => "🔴",
        }
    }

    /// Ordinal where higher means worse; used for `--fail-on` comparisons.
    pub fn severity(&self) -> u8 {
        match self {
            OkrStatus::OnTrack => 0,
            OkrStatus::Caution => 1,
            OkrStatus::AtRisk => 2,
        }
    }
}

/// Whether a key result is driven down to zero or up to a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrDirection {
    MinimizeToZero,
    MaximizeToThreshold,
}

/// How a key result's raw actual is measured over a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KrMeasure {
    /// Number of entities having the capability.
    Count { capability: String },
    /// Share (0-100) of the denominator population that also has the numerator capability.
    Percentage {
        numerator: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        denominator: Option<String>,
    },
}

impl KrMeasure {
    /// Capability names this measure depends on.
    pub fn capabilities(&self) -> Vec<&str> {
        match self {
            KrMeasure::Count { capability } => vec![capability.as_str()],
            KrMeasure::Percentage {
                numerator,
                denominator,
            } => {
                let mut caps = vec![numerator.as_str()];
                if let Some(d) = denominator {
                    caps.push(d.as_str());
                }
                caps
            }
        }
    }
}

/// Entity counts behind one measured value.
///
/// `hits` entities have the measured capability out of `population`: the
/// denominator population for percentages, the whole partition for counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    pub hits: u64,
    pub population: u64,
}

/// Slack for float noise when turning a percentage goal into whole entities.
const GOAL_TOLERANCE: f64 = 1e-9;

/// Remaining work toward a deadline, counted in entities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurnTarget<'a> {
    pub id: &'a str,
    pub deadline: NaiveDate,
    pub direction: KrDirection,
    pub target_value: f64,
    pub measure: &'a KrMeasure,
}

impl BurnTarget<'_> {
    /// Entities still to remove (minimize) or to bring in (maximize).
    ///
    /// Percentage goals are converted to whole entities of the tally's
    /// population: at most `floor` hits may remain when minimizing, at least
    /// `ceil` are needed when maximizing.
    pub fn remaining(&self, tally: Tally) -> f64 {
        let hits = tally.hits as f64;
        let goal = match self.measure {
            KrMeasure::Count { .. } => self.target_value,
            KrMeasure::Percentage { .. } => self.target_value * tally.population as f64 / 100.0,
        };
        let remaining = match self.direction {
            KrDirection::MinimizeToZero => hits - (goal + GOAL_TOLERANCE).floor(),
            KrDirection::MaximizeToThreshold => (goal - GOAL_TOLERANCE).ceil() - hits,
        };
        remaining.max(0.0)
    }
}

fn check_non_negative(id: &str, field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            kr_id: id.to_string(),
            field,
            value,
        })
    }
}

/// One key result of an OKR cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyResultDefinition {
    pub id: String,
    pub name: String,
    /// Share of the overall score, 0.0 to 1.0.
    pub weight: f64,
    pub target_value: f64,
    pub direction: KrDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    pub measure: KrMeasure,
    /// Actual at which a minimize-to-zero key result scores 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
}

impl KeyResultDefinition {
    /// Burndown view; `None` without a deadline.
    pub fn burn_target(&self) -> Option<BurnTarget<'_>> {
        self.deadline.map(|deadline| BurnTarget {
            id: &self.id,
            deadline,
            direction: self.direction,
            target_value: self.target_value,
            measure: &self.measure,
        })
    }
}

/// Work burned down toward a deadline without contributing to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurndownSeries {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub direction: KrDirection,
    /// Goal for the measure; 0 for minimize-to-zero.
    #[serde(default)]
    pub target_value: f64,
    pub deadline: NaiveDate,
    pub measure: KrMeasure,
}

impl BurndownSeries {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative(&self.id, "target_value", self.target_value)
    }

    pub fn burn_target(&self) -> BurnTarget<'_> {
        BurnTarget {
            id: &self.id,
            deadline: self.deadline,
            direction: self.direction,
            target_value: self.target_value,
            measure: &self.measure,
        }
    }
}

/// A validated, ordered set of key results whose weights sum to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyResultSet {
    definitions: Vec<KeyResultDefinition>,
}

impl KeyResultSet {
    /// Validate definitions into a set.
    pub fn new(definitions: Vec<KeyResultDefinition>) -> Result<Self, ConfigError> {
        if definitions.is_empty() {
            return Err(ConfigError::NoKeyResults);
        }

        let mut seen = HashSet::new();
        for kr in &definitions {
            if !seen.insert(kr.id.as_str()) {
                return Err(ConfigError::DuplicateKr {
                    kr_id: kr.id.clone(),
                });
            }
            if !kr.weight.is_finite() || !(0.0..=1.0).contains(&kr.weight) {
                return Err(ConfigError::InvalidWeight {
                    kr_id: kr.id.clone(),
                    weight: kr.weight,
                });
            }
            check_non_negative(&kr.id, "target_value", kr.target_value)?;
            if let Some(baseline) = kr.baseline {
                check_non_negative(&kr.id, "baseline", baseline)?;
            }
            if kr.direction == KrDirection::MinimizeToZero && kr.deadline.is_none() {
                return Err(ConfigError::MissingField {
                    kr_id: kr.id.clone(),
                    field: "deadline",
                });
            }
        }

        let sum: f64 = definitions.iter().map(|kr| kr.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ConfigError::WeightSum { sum });
        }

        Ok(Self { definitions })
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyResultDefinition> {
        self.definitions.iter()
    }

    pub fn get(&self, id: &str) -> Option<&KeyResultDefinition> {
        self.definitions.iter().find(|kr| kr.id == id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.definitions.iter().map(|kr| kr.weight).collect()
    }

    /// Key results that burn down toward zero.
    pub fn minimizing(&self) -> impl Iterator<Item = &KeyResultDefinition> {
        self.definitions
            .iter()
            .filter(|kr| kr.direction == KrDirection::MinimizeToZero)
    }
}

/// Scored result for one dimension value at one point in time.
///
/// Never mutated once archived; a correction is a new snapshot with a new timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub dimension_type: DimensionType,
    pub dimension_value: String,
    pub timestamp: DateTime<Utc>,
    pub total_entities: u64,
    pub per_kr_actuals: BTreeMap<String, f64>,
    pub per_kr_scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub status: OkrStatus,
    #[serde(default)]
    pub low_confidence: bool,
    /// Entity counts behind each key result and burndown series.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tallies: BTreeMap<String, Tally>,
}

impl MetricSnapshot {
    pub fn tally(&self, id: &str) -> Option<Tally> {
        self.tallies.get(id).copied()
    }

    pub fn actual(&self, kr_id: &str) -> Option<f64> {
        self.per_kr_actuals.get(kr_id).copied()
    }

    pub fn score(&self, kr_id: &str) -> Option<f64> {
        self.per_kr_scores.get(kr_id).copied()
    }
}

/// Direction of a score change between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

impl TrendDirection {
    pub fn arrow(&self) -> &'static str {
        match self {
            TrendDirection::Improving => "↑",
            TrendDirection::Stable => "→",
            TrendDirection::Declining => "↓",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Improving => write!(f, "improving"),
            TrendDirection::Stable => write!(f, "stable"),
            TrendDirection::Declining => write!(f, "declining"),
        }
    }
}

/// Score change of a single key result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrDelta {
    pub kr_id: String,
    pub delta: f64,
    pub direction: TrendDirection,
}

/// Period-over-period comparison of two snapshots for the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub previous_score: f64,
    pub current_score: f64,
    pub delta: f64,
    /// Relative change in percent; `None` when the previous score was zero.
    pub pct_change: Option<f64>,
    pub direction: TrendDirection,
    pub days_elapsed: f64,
    #[serde(default)]
    pub per_kr: Vec<KrDelta>,
}

/// Binary risk scale for burndowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BurndownStatus {
    OnTrack,
    AtRisk,
}

impl fmt::Display for BurndownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BurndownStatus::OnTrack => write!(f, "ON TRACK"),
            BurndownStatus::AtRisk => write!(f, "AT RISK"),
        }
    }
}

/// Projected completion date of a burndown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Projection {
    On(NaiveDate),
    Never,
}

impl Projection {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Projection::On(date) => Some(*date),
            Projection::Never => None,
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::On(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Projection::Never => write!(f, "never"),
        }
    }
}

impl From<Projection> for String {
    fn from(p: Projection) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for Projection {
    type Error = chrono::ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.eq_ignore_ascii_case("never") {
            return Ok(Projection::Never);
        }
        NaiveDate::parse_from_str(&s, "%Y-%m-%d").map(Projection::On)
    }
}

/// Rate-to-deadline view of remaining work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurndownResult {
    pub remaining_count: f64,
    pub days_until_deadline: i64,
    pub required_daily_rate: f64,
    pub observed_daily_rate: Option<f64>,
    pub projected_completion: Projection,
    pub status: BurndownStatus,
}

/// How much history exists for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingState {
    /// No prior snapshot.
    New,
    /// One prior snapshot; a delta is possible.
    Tracked,
    /// Two or more prior snapshots; velocity and burndown are available.
    Trended,
}

impl TrackingState {
    pub fn from_prior_count(prior: usize) -> Self {
        match prior {
            0 => TrackingState::New,
            1 => TrackingState::Tracked,
            _ => TrackingState::Trended,
        }
    }
}

/// Burndown of one minimize-to-zero key result or burndown series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrBurndown {
    /// Key result or series id.
    pub kr_id: String,
    pub deadline: NaiveDate,
    pub burndown: BurndownResult,
}

/// Everything the trend analyzer knows about one key at the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub dimension_type: DimensionType,
    pub dimension_value: String,
    pub state: TrackingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub burndowns: Vec<KrBurndown>,
}

/// A scored snapshot paired with what history says about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub snapshot: MetricSnapshot,
    pub trend: TrendReport,
}

/// All groups of one dimension, in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionReport {
    pub dimension: DimensionType,
    pub snapshots: Vec<SnapshotReport>,
}

/// Output of one scoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub overall: SnapshotReport,
    pub dimensions: Vec<DimensionReport>,
}

impl RunReport {
    /// Every snapshot in the run, overall first.
    pub fn snapshots(&self) -> impl Iterator<Item = &SnapshotReport> {
        std::iter::once(&self.overall)
            .chain(self.dimensions.iter().flat_map(|d| d.snapshots.iter()))
    }

    /// Burndowns that are behind schedule, across all groups.
    pub fn at_risk_burndowns(&self) -> impl Iterator<Item = (&SnapshotReport, &KrBurndown)> {
        self.snapshots().flat_map(|r| {
            r.trend
                .burndowns
                .iter()
                .filter(|b| b.burndown.status == BurndownStatus::AtRisk)
                .map(move |b| (r, b))
        })
    }
}
