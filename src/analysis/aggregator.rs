//! Partitioning and per-group scoring.
//!
//! This module groups an entity collection by an organizational dimension,
//! measures every key result per group, and scores each group into a
//! [`MetricSnapshot`].

use super::scorer::{GroupScore, Scorer};
use crate::entity::EntityRecord;
use crate::error::ConfigError;
use crate::models::{
    BurndownSeries, DimensionType, KeyResultSet, KrDirection, KrMeasure, MetricSnapshot, Tally,
    OVERALL_VALUE, UNKNOWN_VALUE,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Aggregation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Groups with fewer entities are flagged low-confidence.
    pub low_confidence_below: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            low_confidence_below: 1,
        }
    }
}

/// Result of aggregating one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub dimension_type: DimensionType,
    /// Snapshot of the whole collection.
    pub overall: MetricSnapshot,
    /// Per-group snapshots in priority order.
    pub groups: Vec<MetricSnapshot>,
}

impl Aggregation {
    /// Overall first, then groups.
    pub fn snapshots(&self) -> impl Iterator<Item = &MetricSnapshot> {
        std::iter::once(&self.overall).chain(self.groups.iter())
    }

    pub fn group(&self, value: &str) -> Option<&MetricSnapshot> {
        self.groups.iter().find(|s| s.dimension_value == value)
    }
}

/// Result of aggregating several dimensions over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct RunAggregation {
    pub overall: MetricSnapshot,
    pub dimensions: Vec<(DimensionType, Vec<MetricSnapshot>)>,
}

impl RunAggregation {
    pub fn snapshots(&self) -> impl Iterator<Item = &MetricSnapshot> {
        std::iter::once(&self.overall).chain(self.dimensions.iter().flat_map(|(_, g)| g.iter()))
    }
}

/// Normalized group key for a raw dimension value.
pub fn dimension_key(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN_VALUE.to_string(),
    }
}

/// Group entities by dimension value. Missing values go to `"Unknown"`.
pub fn group_by_dimension<E: EntityRecord>(
    entities: &[E],
    dimension: DimensionType,
) -> BTreeMap<String, Vec<&E>> {
    let mut grouped: BTreeMap<String, Vec<&E>> = BTreeMap::new();

    for entity in entities {
        grouped
            .entry(dimension_key(entity.dimension_value(dimension)))
            .or_default()
            .push(entity);
    }

    grouped
}

/// Sum of minimize-to-zero actuals: how much work is left in the group.
pub fn urgency(snapshot: &MetricSnapshot, key_results: &KeyResultSet) -> f64 {
    key_results
        .minimizing()
        .filter_map(|kr| snapshot.actual(&kr.id))
        .sum()
}

/// Sort groups by descending urgency, then ascending dimension value.
pub fn prioritize(groups: &mut [MetricSnapshot], key_results: &KeyResultSet) {
    groups.sort_by(|a, b| {
        urgency(b, key_results)
            .total_cmp(&urgency(a, key_results))
            .then_with(|| a.dimension_value.cmp(&b.dimension_value))
    });
}

/// Measured actual, the baseline implied by the group, and the raw counts.
fn measure<E: EntityRecord>(measure: &KrMeasure, members: &[&E]) -> (f64, f64, Tally) {
    match measure {
        KrMeasure::Count { capability } => {
            let count = members.iter().filter(|e| e.has_capability(capability)).count();
            let tally = Tally {
                hits: count as u64,
                population: members.len() as u64,
            };
            (count as f64, members.len() as f64, tally)
        }
        KrMeasure::Percentage {
            numerator,
            denominator,
        } => {
            let population: Vec<&&E> = match denominator {
                Some(d) => members.iter().filter(|e| e.has_capability(d)).collect(),
                None => members.iter().collect(),
            };
            if population.is_empty() {
                return (0.0, 100.0, Tally::default());
            }
            let hits = population
                .iter()
                .filter(|e| e.has_capability(numerator))
                .count();
            let tally = Tally {
                hits: hits as u64,
                population: population.len() as u64,
            };
            (100.0 * hits as f64 / population.len() as f64, 100.0, tally)
        }
    }
}

/// Partitions entity collections and scores each partition.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'a> {
    key_results: &'a KeyResultSet,
    scorer: Scorer<'a>,
    config: &'a AggregationConfig,
    series: &'a [BurndownSeries],
}

impl<'a> Aggregator<'a> {
    pub fn new(
        key_results: &'a KeyResultSet,
        scorer: Scorer<'a>,
        config: &'a AggregationConfig,
    ) -> Self {
        Self {
            key_results,
            scorer,
            config,
            series: &[],
        }
    }

    /// Also tally these burndown series in every partition.
    pub fn with_series(mut self, series: &'a [BurndownSeries]) -> Self {
        self.series = series;
        self
    }

    /// Score one partition.
    ///
    /// An empty partition scores 100 on every key result and is flagged
    /// low-confidence.
    pub fn score_partition<E: EntityRecord>(
        &self,
        dimension_type: DimensionType,
        dimension_value: &str,
        members: &[&E],
        as_of: DateTime<Utc>,
    ) -> Result<MetricSnapshot, ConfigError> {
        let mut per_kr_actuals = BTreeMap::new();
        let mut baselines = BTreeMap::new();
        let mut tallies = BTreeMap::new();

        for kr in self.key_results.iter() {
            let (actual, baseline, tally) = measure(&kr.measure, members);
            per_kr_actuals.insert(kr.id.clone(), actual);
            tallies.insert(kr.id.clone(), tally);
            if kr.direction == KrDirection::MinimizeToZero {
                baselines.insert(kr.id.clone(), baseline);
            }
        }
        for series in self.series {
            let (_, _, tally) = measure(&series.measure, members);
            tallies.insert(series.id.clone(), tally);
        }

        let GroupScore {
            per_kr_scores,
            overall_score,
            status,
            low_confidence,
        } = if members.is_empty() {
            self.scorer.perfect(self.key_results)
        } else {
            self.scorer
                .score_group(self.key_results, &per_kr_actuals, &baselines)?
        };

        let total_entities = members.len() as u64;
        let low_confidence = low_confidence || total_entities < self.config.low_confidence_below;

        debug!(
            "{}={}: {} entities, score {:.1} ({})",
            dimension_type, dimension_value, total_entities, overall_score, status
        );

        Ok(MetricSnapshot {
            dimension_type,
            dimension_value: dimension_value.to_string(),
            timestamp: as_of,
            total_entities,
            per_kr_actuals,
            per_kr_scores,
            overall_score,
            status,
            low_confidence,
            tallies,
        })
    }

    /// Snapshot of the whole collection.
    pub fn score_overall<E: EntityRecord>(
        &self,
        entities: &[E],
        as_of: DateTime<Utc>,
    ) -> Result<MetricSnapshot, ConfigError> {
        let members: Vec<&E> = entities.iter().collect();
        let overall = self.score_partition(DimensionType::Overall, OVERALL_VALUE, &members, as_of)?;
        info!(
            "Overall: {} entities, score {:.1} {} {}",
            overall.total_entities,
            overall.overall_score,
            overall.status.emoji(),
            overall.status
        );
        Ok(overall)
    }

    fn score_groups<E: EntityRecord>(
        &self,
        entities: &[E],
        dimension: DimensionType,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, ConfigError> {
        if dimension == DimensionType::Overall {
            return Ok(Vec::new());
        }

        let grouped = group_by_dimension(entities, dimension);
        debug!("{} partitions for dimension {}", grouped.len(), dimension);

        let mut groups = grouped
            .iter()
            .map(|(value, members)| self.score_partition(dimension, value, members, as_of))
            .collect::<Result<Vec<_>, _>>()?;

        prioritize(&mut groups, self.key_results);
        Ok(groups)
    }

    /// Aggregate one dimension plus the overall snapshot.
    pub fn aggregate<E: EntityRecord>(
        &self,
        entities: &[E],
        dimension: DimensionType,
        as_of: DateTime<Utc>,
    ) -> Result<Aggregation, ConfigError> {
        let overall = self.score_overall(entities, as_of)?;
        let groups = self.score_groups(entities, dimension, as_of)?;

        Ok(Aggregation {
            dimension_type: dimension,
            overall,
            groups,
        })
    }

    /// Aggregate several dimensions, sharing one overall snapshot.
    pub fn aggregate_all<E: EntityRecord>(
        &self,
        entities: &[E],
        dimensions: &[DimensionType],
        as_of: DateTime<Utc>,
    ) -> Result<RunAggregation, ConfigError> {
        let overall = self.score_overall(entities, as_of)?;
        let dimensions = dimensions
            .iter()
            .filter(|d| **d != DimensionType::Overall)
            .map(|d| Ok((*d, self.score_groups(entities, *d, as_of)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(RunAggregation {
            overall,
            dimensions,
        })
    }
}
