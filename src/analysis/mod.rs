//! Scoring, aggregation and trend analysis.

pub mod aggregator;
pub mod burndown;
pub mod scorer;
pub mod trend;

pub use aggregator::{
    dimension_key, group_by_dimension, prioritize, urgency, Aggregation, AggregationConfig,
    Aggregator, RunAggregation,
};
pub use burndown::{calculate_burndown, project_completion_date};
pub use scorer::{
    classify_status, compute_kr_score, compute_overall, GroupScore, KrScore, Scorer,
    StatusThresholds,
};
pub use trend::{
    calculate_trend, calculate_velocity, direction_of, velocity_series, BurnPoint, GroupTrend,
    TrendAnalyzer, TrendConfig,
};
