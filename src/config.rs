//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.okrtrend.toml` files, and validating it into the runtime values the
//! scorer, aggregator and trend analyzer are constructed with.

use crate::analysis::{AggregationConfig, StatusThresholds, TrendConfig};
use crate::entity::{CapabilityDef, FieldMapping, FieldRule, MatchMode};
use crate::error::ConfigError;
use crate::models::{
    BurndownSeries, DimensionType, KeyResultDefinition, KeyResultSet, KrDirection, KrMeasure,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".okrtrend.toml";

/// Longest accepted history window, in days.
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Score thresholds.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Trend settings.
    #[serde(default)]
    pub trend: TrendSettings,

    /// Dimension to source attribute names.
    #[serde(default)]
    pub fields: FieldsConfig,

    /// Named capabilities.
    #[serde(default = "default_capabilities")]
    pub capabilities: BTreeMap<String, CapabilityDef>,

    /// Key results of the OKR cycle.
    #[serde(default = "default_key_results")]
    pub key_results: Vec<KeyResultConfig>,

    /// Unscored burndowns reported alongside the key results.
    #[serde(default = "default_burndowns")]
    pub burndowns: Vec<BurndownSeries>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            scoring: ScoringConfig::default(),
            trend: TrendSettings::default(),
            fields: FieldsConfig::default(),
            capabilities: default_capabilities(),
            key_results: default_key_results(),
            burndowns: default_burndowns(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Snapshot archive directory.
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// Dimensions to aggregate by.
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            dimensions: default_dimensions(),
        }
    }
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("data/history")
}

fn default_dimensions() -> Vec<String> {
    vec!["country", "sdm", "site"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Status thresholds and confidence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Minimum overall score for ON TRACK.
    #[serde(default = "default_on_track_min")]
    pub on_track_min: f64,

    /// Minimum overall score for CAUTION.
    #[serde(default = "default_caution_min")]
    pub caution_min: f64,

    /// Partitions with fewer entities are flagged low-confidence.
    #[serde(default = "default_low_confidence_below")]
    pub low_confidence_below: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            on_track_min: default_on_track_min(),
            caution_min: default_caution_min(),
            low_confidence_below: default_low_confidence_below(),
        }
    }
}

fn default_on_track_min() -> f64 {
    80.0
}

fn default_caution_min() -> f64 {
    60.0
}

fn default_low_confidence_below() -> u64 {
    1
}

/// Trend comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSettings {
    /// Score change below which a trend counts as stable.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// How far back history is loaded for velocity.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            lookback_days: default_lookback_days(),
        }
    }
}

fn default_epsilon() -> f64 {
    0.5
}

fn default_lookback_days() -> u32 {
    90
}

/// Source attribute holding each dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsConfig {
    #[serde(default = "default_country_field")]
    pub country: String,

    #[serde(default = "default_sdm_field")]
    pub sdm: String,

    #[serde(default = "default_site_field")]
    pub site: String,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            country: default_country_field(),
            sdm: default_sdm_field(),
            site: default_site_field(),
        }
    }
}

fn default_country_field() -> String {
    "Country".to_string()
}

fn default_sdm_field() -> String {
    "SDM".to_string()
}

fn default_site_field() -> String {
    "Site Location".to_string()
}

/// A key result as written in the config file. Validated by [`Config::key_result_set`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyResultConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Share of the overall score, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// Defaults to 0 for minimize-to-zero key results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<KrDirection>,

    /// `YYYY-MM-DD`, quoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<KrMeasure>,
}

impl KeyResultConfig {
    fn validate(&self, index: usize) -> Result<KeyResultDefinition, ConfigError> {
        let id = self.id.clone().ok_or_else(|| ConfigError::MissingField {
            kr_id: format!("#{}", index + 1),
            field: "id",
        })?;
        let missing = |field: &'static str| ConfigError::MissingField {
            kr_id: id.clone(),
            field,
        };

        let weight = self.weight.ok_or_else(|| missing("weight"))?;
        let direction = self.direction.ok_or_else(|| missing("direction"))?;
        let measure = self.measure.clone().ok_or_else(|| missing("measure"))?;
        let target_value = match (direction, self.target_value) {
            (_, Some(t)) => t,
            (KrDirection::MinimizeToZero, None) => 0.0,
            (KrDirection::MaximizeToThreshold, None) => return Err(missing("target_value")),
        };

        Ok(KeyResultDefinition {
            name: self.name.clone().unwrap_or_else(|| id.clone()),
            id,
            weight,
            target_value,
            direction,
            deadline: self.deadline,
            measure,
            baseline: self.baseline,
        })
    }
}

fn action_rule(value: &str) -> FieldRule {
    FieldRule {
        field: "Action to take".to_string(),
        equals: Some(value.to_string()),
        ..Default::default()
    }
}

fn single(rule: FieldRule) -> CapabilityDef {
    CapabilityDef {
        mode: MatchMode::All,
        rules: vec![rule],
    }
}

fn default_capabilities() -> BTreeMap<String, CapabilityDef> {
    let mut caps = BTreeMap::new();

    caps.insert(
        "is_esol_2024".to_string(),
        single(action_rule("Urgent Replacement")),
    );
    caps.insert(
        "is_esol_2025".to_string(),
        single(action_rule("Replace by 14/10/2025")),
    );
    caps.insert(
        "is_esol_2026".to_string(),
        single(action_rule("Replace by 11/11/2026")),
    );
    caps.insert(
        "is_enterprise".to_string(),
        single(FieldRule {
            field: "LTSC or Enterprise".to_string(),
            equals: Some("Enterprise".to_string()),
            ..Default::default()
        }),
    );
    caps.insert(
        "win11_upgraded".to_string(),
        single(FieldRule {
            field: "Current OS".to_string(),
            contains: vec!["windows 11".to_string()],
            case_insensitive: true,
            ..Default::default()
        }),
    );
    // Upgraded devices, plus ESOL devices that get Windows 11 through replacement.
    caps.insert(
        "win11_eligible".to_string(),
        CapabilityDef {
            mode: MatchMode::Any,
            rules: vec![
                FieldRule {
                    field: "Current OS".to_string(),
                    contains: vec!["windows 11".to_string()],
                    case_insensitive: true,
                    ..Default::default()
                },
                FieldRule {
                    field: "Action to take".to_string(),
                    any_of: vec![
                        "Urgent Replacement".to_string(),
                        "Replace by 14/10/2025".to_string(),
                    ],
                    ..Default::default()
                },
            ],
        },
    );
    caps.insert(
        "is_enterprise_kiosk".to_string(),
        CapabilityDef {
            mode: MatchMode::All,
            rules: vec![
                FieldRule {
                    field: "Device Name".to_string(),
                    contains: vec!["kiosk".to_string(), "ksk".to_string()],
                    case_insensitive: true,
                    ..Default::default()
                },
                FieldRule {
                    field: "LTSC or Enterprise".to_string(),
                    equals: Some("Enterprise".to_string()),
                    ..Default::default()
                },
            ],
        },
    );
    caps.insert(
        "is_ltsc_kiosk".to_string(),
        CapabilityDef {
            mode: MatchMode::All,
            rules: vec![
                FieldRule {
                    field: "Device Name".to_string(),
                    contains: vec!["kiosk".to_string(), "ksk".to_string()],
                    case_insensitive: true,
                    ..Default::default()
                },
                FieldRule {
                    field: "LTSC or Enterprise".to_string(),
                    equals: Some("LTSC".to_string()),
                    ..Default::default()
                },
            ],
        },
    );

    caps
}

fn default_key_results() -> Vec<KeyResultConfig> {
    vec![
        KeyResultConfig {
            id: Some("kr1_esol_2024".to_string()),
            name: Some("Remediate 2024 ESOL devices".to_string()),
            weight: Some(0.25),
            target_value: Some(0.0),
            direction: Some(KrDirection::MinimizeToZero),
            deadline: NaiveDate::from_ymd_opt(2025, 6, 30),
            // Score reaches 0 at 1% of the fleet.
            baseline: Some(1.0),
            measure: Some(KrMeasure::Percentage {
                numerator: "is_esol_2024".to_string(),
                denominator: None,
            }),
        },
        KeyResultConfig {
            id: Some("kr2_esol_2025".to_string()),
            name: Some("Remediate 2025 ESOL devices".to_string()),
            weight: Some(0.25),
            target_value: Some(0.0),
            direction: Some(KrDirection::MinimizeToZero),
            deadline: NaiveDate::from_ymd_opt(2025, 12, 31),
            baseline: Some(5.0),
            measure: Some(KrMeasure::Percentage {
                numerator: "is_esol_2025".to_string(),
                denominator: None,
            }),
        },
        KeyResultConfig {
            id: Some("kr3_win11_compatibility".to_string()),
            name: Some("Windows 11 compatibility".to_string()),
            weight: Some(0.40),
            target_value: Some(90.0),
            direction: Some(KrDirection::MaximizeToThreshold),
            deadline: NaiveDate::from_ymd_opt(2025, 10, 31),
            baseline: None,
            measure: Some(KrMeasure::Percentage {
                numerator: "win11_eligible".to_string(),
                denominator: Some("is_enterprise".to_string()),
            }),
        },
        KeyResultConfig {
            id: Some("kr4_kiosk_reprovisioning".to_string()),
            name: Some("Re-provision Enterprise kiosks".to_string()),
            weight: Some(0.10),
            target_value: Some(0.0),
            direction: Some(KrDirection::MinimizeToZero),
            deadline: NaiveDate::from_ymd_opt(2025, 6, 30),
            // Any remaining Enterprise kiosk scores 0.
            baseline: Some(1.0),
            measure: Some(KrMeasure::Count {
                capability: "is_enterprise_kiosk".to_string(),
            }),
        },
    ]
}

fn default_burndowns() -> Vec<BurndownSeries> {
    vec![
        BurndownSeries {
            id: "esol_2026".to_string(),
            name: "Replace 2026 ESOL devices".to_string(),
            direction: KrDirection::MinimizeToZero,
            target_value: 0.0,
            deadline: NaiveDate::from_ymd_opt(2026, 11, 11).unwrap_or_default(),
            measure: KrMeasure::Count {
                capability: "is_esol_2026".to_string(),
            },
        },
        // Every eligible device upgraded by the KPI date.
        BurndownSeries {
            id: "win11_upgrade".to_string(),
            name: "Windows 11 upgrade backlog".to_string(),
            direction: KrDirection::MaximizeToThreshold,
            target_value: 100.0,
            deadline: NaiveDate::from_ymd_opt(2025, 10, 31).unwrap_or_default(),
            measure: KrMeasure::Percentage {
                numerator: "win11_upgraded".to_string(),
                denominator: Some("win11_eligible".to_string()),
            },
        },
    ]
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.history_dir {
            self.general.history_dir = dir.clone();
        }
        if let Some(ref dims) = args.dimensions {
            self.general.dimensions = dims.clone();
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }

    /// Validate the key results against the configured capabilities.
    pub fn key_result_set(&self) -> Result<KeyResultSet, ConfigError> {
        let definitions = self
            .key_results
            .iter()
            .enumerate()
            .map(|(i, kr)| kr.validate(i))
            .collect::<Result<Vec<_>, _>>()?;

        for kr in &definitions {
            for capability in kr.measure.capabilities() {
                if !self.capabilities.contains_key(capability) {
                    return Err(ConfigError::UnknownCapability {
                        kr_id: kr.id.clone(),
                        capability: capability.to_string(),
                    });
                }
            }
        }

        KeyResultSet::new(definitions)
    }

    /// Build the capability and dimension mapping.
    pub fn field_mapping(&self) -> Result<FieldMapping, ConfigError> {
        if let Some((name, _)) = self.capabilities.iter().find(|(_, c)| c.rules.is_empty()) {
            return Err(ConfigError::EmptyCapability {
                capability: name.clone(),
            });
        }

        let mut dimensions = HashMap::new();
        dimensions.insert(DimensionType::Country, self.fields.country.clone());
        dimensions.insert(DimensionType::Sdm, self.fields.sdm.clone());
        dimensions.insert(DimensionType::Site, self.fields.site.clone());

        let capabilities = self
            .capabilities
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(FieldMapping::new(dimensions, capabilities))
    }

    pub fn thresholds(&self) -> Result<StatusThresholds, ConfigError> {
        StatusThresholds::new(self.scoring.on_track_min, self.scoring.caution_min)
    }

    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            low_confidence_below: self.scoring.low_confidence_below,
        }
    }

    pub fn trend_config(&self) -> Result<TrendConfig, ConfigError> {
        let epsilon = self.trend.epsilon;
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err(ConfigError::InvalidTrendSetting {
                setting: "epsilon",
                value: epsilon,
                expected: "a finite non-negative number",
            });
        }
        if self.trend.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ConfigError::InvalidTrendSetting {
                setting: "lookback_days",
                value: f64::from(self.trend.lookback_days),
                expected: "at most 36500",
            });
        }

        Ok(TrendConfig {
            epsilon,
            lookback_days: self.trend.lookback_days,
        })
    }

    /// Validate the burndown series against the key results and capabilities.
    pub fn burndown_series(&self) -> Result<Vec<BurndownSeries>, ConfigError> {
        let mut seen: Vec<&str> = self
            .key_results
            .iter()
            .filter_map(|kr| kr.id.as_deref())
            .collect();

        for series in &self.burndowns {
            if seen.contains(&series.id.as_str()) {
                return Err(ConfigError::DuplicateKr {
                    kr_id: series.id.clone(),
                });
            }
            seen.push(&series.id);

            series.validate()?;
            for capability in series.measure.capabilities() {
                if !self.capabilities.contains_key(capability) {
                    return Err(ConfigError::UnknownCapability {
                        kr_id: series.id.clone(),
                        capability: capability.to_string(),
                    });
                }
            }
        }

        Ok(self.burndowns.clone())
    }

    /// Parse the configured dimensions, rejecting `overall`.
    pub fn dimensions(&self) -> Result<Vec<DimensionType>, ConfigError> {
        let mut dims = Vec::new();
        for raw in &self.general.dimensions {
            let dim: DimensionType = raw.parse()?;
            if dim == DimensionType::Overall {
                return Err(ConfigError::InvalidDimension(raw.clone()));
            }
            if !dims.contains(&dim) {
                dims.push(dim);
            }
        }
        Ok(dims)
    }
}
