//! Run report generation.

pub mod generator;

pub use generator::{build_run_report, generate_json_report, generate_summary, write_json_report};
