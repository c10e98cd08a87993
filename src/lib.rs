//! okrtrend - organizational OKR scoring and historical trend engine.
//!
//! Scores an entity collection (devices, sites, accounts) against a set of
//! weighted key results, grouped by country, SDM and site. Each scored
//! group becomes an immutable [`models::MetricSnapshot`] that is archived
//! and later compared against earlier runs to produce trends, burn
//! velocity and deadline burndowns.
//!
//! The pipeline is:
//!
//! ```text
//! entities -> Aggregator -> Scorer -> MetricSnapshot -> SnapshotStore
//!                                            |
//!                                            v
//!                                      TrendAnalyzer -> TrendReport
//! ```

pub mod analysis;
pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod history;
pub mod models;
pub mod report;
