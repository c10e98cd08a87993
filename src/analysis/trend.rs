//! Trend analysis over archived snapshots.
//!
//! Period-over-period deltas, burn velocity by least-squares regression,
//! and per-key tracking state (NEW -> TRACKED -> TRENDED).

use super::burndown::calculate_burndown;
use crate::history::{ArchiveKey, SnapshotStore};
use crate::models::{
    BurnTarget, BurndownSeries, KeyResultSet, KrBurndown, KrDelta, MetricSnapshot,
    TrackingState, TrendDirection, TrendReport, TrendResult,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Trend settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendConfig {
    /// Score changes within +/- epsilon are stable.
    pub epsilon: f64,
    /// History window loaded from the archive.
    pub lookback_days: u32,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.5,
            lookback_days: 90,
        }
    }
}

fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Direction of a change given the stability band.
pub fn direction_of(delta: f64, epsilon: f64) -> TrendDirection {
    if delta > epsilon {
        TrendDirection::Improving
    } else if delta < -epsilon {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

/// Compare two snapshots of the same key.
pub fn calculate_trend(
    current: &MetricSnapshot,
    previous: &MetricSnapshot,
    epsilon: f64,
) -> TrendResult {
    let delta = current.overall_score - previous.overall_score;
    let pct_change = if previous.overall_score == 0.0 {
        None
    } else {
        Some(delta / previous.overall_score * 100.0)
    };

    let per_kr = current
        .per_kr_scores
        .iter()
        .filter_map(|(kr_id, score)| {
            let before = previous.score(kr_id)?;
            let kr_delta = score - before;
            Some(KrDelta {
                kr_id: kr_id.clone(),
                delta: kr_delta,
                direction: direction_of(kr_delta, epsilon),
            })
        })
        .collect();

    TrendResult {
        previous_score: previous.overall_score,
        current_score: current.overall_score,
        delta,
        pct_change,
        direction: direction_of(delta, epsilon),
        days_elapsed: days_between(previous.timestamp, current.timestamp),
        per_kr,
    }
}

/// Remaining entities of one burndown at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurnPoint {
    pub timestamp: DateTime<Utc>,
    pub remaining: f64,
}

/// Points for one burndown, skipping snapshots without a tally for it.
pub fn velocity_series(snapshots: &[MetricSnapshot], target: &BurnTarget<'_>) -> Vec<BurnPoint> {
    snapshots
        .iter()
        .filter_map(|s| {
            s.tally(target.id).map(|tally| BurnPoint {
                timestamp: s.timestamp,
                remaining: target.remaining(tally),
            })
        })
        .collect()
}

/// Burn rate in units per day; positive when remaining work shrinks.
///
/// Least-squares slope of remaining against elapsed days. `None` with fewer
/// than two points or when all points share one timestamp.
pub fn calculate_velocity(points: &[BurnPoint]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let origin = points.iter().map(|p| p.timestamp).min()?;
    let xs: Vec<f64> = points
        .iter()
        .map(|p| days_between(origin, p.timestamp))
        .collect();
    let n = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.remaining).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, p) in xs.iter().zip(points) {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (p.remaining - mean_y);
    }

    if sxx <= 0.0 {
        return None;
    }

    let velocity = -(sxy / sxx);
    velocity.is_finite().then_some(velocity)
}

/// Trend of one group between two listings.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTrend {
    pub dimension_value: String,
    pub trend: Option<TrendResult>,
}

/// Compares current snapshots against their history.
#[derive(Debug, Clone, Copy)]
pub struct TrendAnalyzer<'a> {
    config: &'a TrendConfig,
    key_results: &'a KeyResultSet,
    series: &'a [BurndownSeries],
}

impl<'a> TrendAnalyzer<'a> {
    pub fn new(config: &'a TrendConfig, key_results: &'a KeyResultSet) -> Self {
        Self {
            config,
            key_results,
            series: &[],
        }
    }

    /// Also burn down these series once a key is trended.
    pub fn with_series(mut self, series: &'a [BurndownSeries]) -> Self {
        self.series = series;
        self
    }

    /// Build the trend report for `current` given its key's history.
    ///
    /// History may contain `current` itself or later snapshots; only strictly
    /// earlier snapshots of the same key count as prior.
    pub fn compare(&self, current: &MetricSnapshot, history: &[MetricSnapshot]) -> TrendReport {
        let mut prior: Vec<MetricSnapshot> = history
            .iter()
            .filter(|s| {
                s.dimension_type == current.dimension_type
                    && s.dimension_value == current.dimension_value
                    && s.timestamp < current.timestamp
            })
            .cloned()
            .collect();
        prior.sort_by_key(|s| s.timestamp);

        let prior_count = prior.len();
        let state = TrackingState::from_prior_count(prior_count);
        let trend = prior
            .last()
            .map(|previous| calculate_trend(current, previous, self.config.epsilon));

        let burndowns = if state == TrackingState::Trended {
            prior.push(current.clone());
            self.burndowns(current, &prior)
        } else {
            Vec::new()
        };

        debug!(
            "{}={}: {:?} with {} prior snapshot(s)",
            current.dimension_type, current.dimension_value, state, prior_count
        );

        TrendReport {
            dimension_type: current.dimension_type,
            dimension_value: current.dimension_value.clone(),
            state,
            trend,
            burndowns,
        }
    }

    /// Minimize-to-zero key results with a deadline, then the extra series.
    fn burn_targets(&self) -> impl Iterator<Item = BurnTarget<'a>> {
        self.key_results
            .minimizing()
            .filter_map(|kr| kr.burn_target())
            .chain(self.series.iter().map(|s| s.burn_target()))
    }

    fn burndowns(&self, current: &MetricSnapshot, history: &[MetricSnapshot]) -> Vec<KrBurndown> {
        let today = current.timestamp.date_naive();

        self.burn_targets()
            .filter_map(|target| {
                let remaining = target.remaining(current.tally(target.id)?);
                let velocity = calculate_velocity(&velocity_series(history, &target));
                Some(KrBurndown {
                    kr_id: target.id.to_string(),
                    deadline: target.deadline,
                    burndown: calculate_burndown(remaining, target.deadline, velocity, today),
                })
            })
            .collect()
    }

    /// Load the lookback window for `current`'s key and compare.
    ///
    /// An unreadable archive degrades to a cold start.
    pub fn compare_with_store<S: SnapshotStore + ?Sized>(
        &self,
        store: &S,
        current: &MetricSnapshot,
    ) -> TrendReport {
        let key = ArchiveKey::of(current);
        let start = current
            .timestamp
            .checked_sub_signed(Duration::days(i64::from(self.config.lookback_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let history = match store.load_range(&key, start, current.timestamp) {
            Ok(history) => history,
            Err(e) => {
                warn!("History for {} unavailable, treating as new: {}", key, e);
                Vec::new()
            }
        };

        self.compare(current, &history)
    }

    /// Join two listings of the same dimension by value.
    ///
    /// Groups absent from `previous` get no trend.
    pub fn compare_groups(
        &self,
        current: &[MetricSnapshot],
        previous: &[MetricSnapshot],
    ) -> Vec<GroupTrend> {
        let previous_by_value: HashMap<&str, &MetricSnapshot> = previous
            .iter()
            .map(|s| (s.dimension_value.as_str(), s))
            .collect();

        current
            .iter()
            .map(|s| GroupTrend {
                dimension_value: s.dimension_value.clone(),
                trend: previous_by_value
                    .get(s.dimension_value.as_str())
                    .map(|prev| calculate_trend(s, prev, self.config.epsilon)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemorySnapshotStore;
    use crate::models::{
        BurndownStatus, DimensionType, KeyResultDefinition, KrDirection, KrMeasure, OkrStatus,
        Projection, Tally,
    };
    use chrono::{NaiveDate, TimeZone};
    use std::collections::BTreeMap;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::days(i64::from(day))
    }

    fn snapshot(day: u32, score: f64, remaining: f64) -> MetricSnapshot {
        MetricSnapshot {
            dimension_type: DimensionType::Site,
            dimension_value: "Lyon".to_string(),
            timestamp: at(day),
            total_entities: 200,
            per_kr_actuals: BTreeMap::from([("esol".to_string(), remaining)]),
            per_kr_scores: BTreeMap::from([("esol".to_string(), score)]),
            overall_score: score,
            status: OkrStatus::Caution,
            low_confidence: false,
            tallies: BTreeMap::from([(
                "esol".to_string(),
                Tally {
                    hits: remaining as u64,
                    population: 200,
                },
            )]),
        }
    }

    fn key_results(deadline: NaiveDate) -> KeyResultSet {
        KeyResultSet::new(vec![KeyResultDefinition {
            id: "esol".to_string(),
            name: "ESOL".to_string(),
            weight: 1.0,
            target_value: 0.0,
            direction: KrDirection::MinimizeToZero,
            deadline: Some(deadline),
            measure: KrMeasure::Count {
                capability: "esol".to_string(),
            },
            baseline: None,
        }])
        .unwrap()
    }

    fn point(day: u32, remaining: f64) -> BurnPoint {
        BurnPoint {
            timestamp: at(day),
            remaining,
        }
    }

    #[test]
    fn test_calculate_trend() {
        let t = calculate_trend(&snapshot(7, 72.0, 0.0), &snapshot(0, 60.0, 0.0), 0.5);
        assert!((t.delta - 12.0).abs() < 1e-9);
        assert_eq!(t.direction, TrendDirection::Improving);
        assert!((t.pct_change.unwrap() - 20.0).abs() < 1e-9);
        assert!((t.days_elapsed - 7.0).abs() < 1e-9);
        assert_eq!(t.per_kr.len(), 1);
        assert_eq!(t.per_kr[0].direction, TrendDirection::Improving);

        let down = calculate_trend(&snapshot(7, 50.0, 0.0), &snapshot(0, 60.0, 0.0), 0.5);
        assert_eq!(down.direction, TrendDirection::Declining);
    }

    #[test]
    fn test_trend_stable_within_epsilon() {
        for delta in [-0.5, -0.2, 0.0, 0.3, 0.5] {
            let t = calculate_trend(
                &snapshot(1, 70.0 + delta, 0.0),
                &snapshot(0, 70.0, 0.0),
                0.5,
            );
            assert_eq!(t.direction, TrendDirection::Stable, "delta {delta}");
        }
    }

    #[test]
    fn test_pct_change_from_zero() {
        let t = calculate_trend(&snapshot(1, 10.0, 0.0), &snapshot(0, 0.0, 0.0), 0.5);
        assert_eq!(t.pct_change, None);
    }

    #[test]
    fn test_two_point_velocity() {
        let v = calculate_velocity(&[point(0, 100.0), point(30, 70.0)]).unwrap();
        assert!((v - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_regression_velocity() {
        // Noisy but trending down by 2/day.
        let points = [
            point(0, 100.0),
            point(5, 91.0),
            point(10, 80.0),
            point(15, 71.0),
            point(20, 60.0),
        ];
        let v = calculate_velocity(&points).unwrap();
        assert!((v - 2.0).abs() < 0.1);

        // Unsorted input gives the same answer.
        let mut shuffled = points;
        shuffled.reverse();
        assert!((calculate_velocity(&shuffled).unwrap() - v).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_needs_span() {
        assert_eq!(calculate_velocity(&[]), None);
        assert_eq!(calculate_velocity(&[point(0, 10.0)]), None);
        assert_eq!(calculate_velocity(&[point(3, 10.0), point(3, 8.0)]), None);
    }

    #[test]
    fn test_growing_backlog_is_negative_velocity() {
        let v = calculate_velocity(&[point(0, 10.0), point(10, 30.0)]).unwrap();
        assert!(v < 0.0);
    }

    #[test]
    fn test_compare_progresses_through_states() {
        let config = TrendConfig::default();
        let set = key_results(NaiveDate::from_ymd_opt(2025, 3, 22).unwrap());
        let analyzer = TrendAnalyzer::new(&config, &set);

        let first = snapshot(0, 40.0, 100.0);
        let report = analyzer.compare(&first, &[first.clone()]);
        assert_eq!(report.state, TrackingState::New);
        assert!(report.trend.is_none());
        assert!(report.burndowns.is_empty());

        let second = snapshot(15, 45.0, 85.0);
        let report = analyzer.compare(&second, &[first.clone()]);
        assert_eq!(report.state, TrackingState::Tracked);
        assert!(report.trend.is_some());
        assert!(report.burndowns.is_empty());

        let third = snapshot(30, 50.0, 70.0);
        let report = analyzer.compare(&third, &[first, second, third.clone()]);
        assert_eq!(report.state, TrackingState::Trended);
        let trend = report.trend.unwrap();
        assert!((trend.previous_score - 45.0).abs() < 1e-9);

        // 1/day observed, 70 left with 50 days to go needs 1.4/day.
        assert_eq!(report.burndowns.len(), 1);
        let b = &report.burndowns[0].burndown;
        assert!((b.observed_daily_rate.unwrap() - 1.0).abs() < 1e-9);
        assert!((b.required_daily_rate - 1.4).abs() < 1e-9);
        assert_eq!(b.status, BurndownStatus::AtRisk);
    }

    #[test]
    fn test_compare_ignores_other_keys() {
        let config = TrendConfig::default();
        let set = key_results(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        let analyzer = TrendAnalyzer::new(&config, &set);

        let mut other = snapshot(0, 10.0, 5.0);
        other.dimension_value = "Paris".to_string();
        let report = analyzer.compare(&snapshot(5, 20.0, 5.0), &[other]);
        assert_eq!(report.state, TrackingState::New);
    }

    #[test]
    fn test_compare_with_store_cold_start_and_history() {
        let config = TrendConfig::default();
        let set = key_results(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        let analyzer = TrendAnalyzer::new(&config, &set);
        let store = MemorySnapshotStore::new();

        let first = snapshot(0, 40.0, 100.0);
        assert_eq!(
            analyzer.compare_with_store(&store, &first).state,
            TrackingState::New
        );

        store.save(&first).unwrap();
        let second = snapshot(7, 41.0, 90.0);
        let report = analyzer.compare_with_store(&store, &second);
        assert_eq!(report.state, TrackingState::Tracked);
        assert_eq!(report.trend.unwrap().direction, TrendDirection::Improving);
    }

    #[test]
    fn test_lookback_window_limits_history() {
        let config = TrendConfig {
            epsilon: 0.5,
            lookback_days: 10,
        };
        let set = key_results(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        let analyzer = TrendAnalyzer::new(&config, &set);
        let store = MemorySnapshotStore::new();

        store.save(&snapshot(0, 40.0, 100.0)).unwrap();
        store.save(&snapshot(25, 45.0, 80.0)).unwrap();

        let report = analyzer.compare_with_store(&store, &snapshot(30, 50.0, 70.0));
        assert_eq!(report.state, TrackingState::Tracked);
    }

    #[test]
    fn test_unbounded_lookback_reaches_all_history() {
        let config = TrendConfig {
            epsilon: 0.5,
            lookback_days: u32::MAX,
        };
        let set = key_results(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        let analyzer = TrendAnalyzer::new(&config, &set);
        let store = MemorySnapshotStore::new();

        store.save(&snapshot(0, 40.0, 100.0)).unwrap();
        store.save(&snapshot(25, 45.0, 80.0)).unwrap();

        let report = analyzer.compare_with_store(&store, &snapshot(30, 50.0, 70.0));
        assert_eq!(report.state, TrackingState::Trended);
    }

    #[test]
    fn test_series_burn_down_in_entities() {
        let config = TrendConfig::default();
        let set = key_results(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        let series = vec![BurndownSeries {
            id: "win11".to_string(),
            name: "Windows 11 upgrades".to_string(),
            direction: KrDirection::MaximizeToThreshold,
            target_value: 100.0,
            deadline: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            measure: KrMeasure::Percentage {
                numerator: "win11_upgraded".to_string(),
                denominator: Some("win11_eligible".to_string()),
            },
        }];
        let analyzer = TrendAnalyzer::new(&config, &set).with_series(&series);

        let upgraded = |day: u32, hits: u64| {
            let mut s = snapshot(day, 50.0, 10.0);
            s.tallies.insert(
                "win11".to_string(),
                Tally {
                    hits,
                    population: 120,
                },
            );
            s
        };
        let current = upgraded(20, 80);
        let report = analyzer.compare(&current, &[upgraded(0, 60), upgraded(10, 70)]);
        assert_eq!(report.state, TrackingState::Trended);
        assert_eq!(report.burndowns.len(), 2);

        // ESOL count is flat: no velocity, still 10 devices to go.
        let esol = &report.burndowns[0];
        assert_eq!(esol.kr_id, "esol");
        assert_eq!(esol.burndown.remaining_count, 10.0);
        assert_eq!(esol.burndown.status, BurndownStatus::AtRisk);

        // 40 devices left, upgrading 1/day, 69 days to the deadline.
        let win11 = &report.burndowns[1];
        assert_eq!(win11.kr_id, "win11");
        assert_eq!(win11.burndown.remaining_count, 40.0);
        assert_eq!(win11.burndown.days_until_deadline, 69);
        assert!((win11.burndown.observed_daily_rate.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(win11.burndown.status, BurndownStatus::OnTrack);
        assert_eq!(
            win11.burndown.projected_completion,
            Projection::On(NaiveDate::from_ymd_opt(2025, 3, 2).unwrap())
        );
    }

    #[test]
    fn test_snapshots_without_tallies_are_skipped() {
        let config = TrendConfig::default();
        let set = key_results(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        let analyzer = TrendAnalyzer::new(&config, &set);

        let mut legacy = snapshot(0, 40.0, 100.0);
        legacy.tallies.clear();
        let history = [legacy, snapshot(10, 45.0, 90.0)];
        let report = analyzer.compare(&snapshot(20, 50.0, 80.0), &history);

        assert_eq!(report.state, TrackingState::Trended);
        let b = &report.burndowns[0].burndown;
        assert!((b.observed_daily_rate.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_groups() {
        let config = TrendConfig::default();
        let set = key_results(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        let analyzer = TrendAnalyzer::new(&config, &set);

        let previous = vec![snapshot(0, 60.0, 10.0)];
        let mut new_site = snapshot(7, 90.0, 1.0);
        new_site.dimension_value = "Nantes".to_string();
        let current = vec![snapshot(7, 58.0, 12.0), new_site];

        let trends = analyzer.compare_groups(&current, &previous);
        assert_eq!(trends.len(), 2);
        assert_eq!(
            trends[0].trend.as_ref().unwrap().direction,
            TrendDirection::Declining
        );
        assert_eq!(trends[1].dimension_value, "Nantes");
        assert!(trends[1].trend.is_none());
    }
}
