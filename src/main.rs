//! okrtrend - OKR scoring and historical trend engine
//!
//! Scores an entity inventory against weighted key results, archives the
//! snapshots, and reports trends against earlier runs.
//!
//! Exit codes:
//!   0 - Success (overall status above --fail-on, or no --fail-on set)
//!   1 - Runtime error (bad config, unreadable input, archive failure, etc.)
//!   2 - Overall status at or below the --fail-on level

use anyhow::{Context, Result};
use okrtrend::analysis::{Aggregator, Scorer, TrendAnalyzer};
use okrtrend::cli::Args;
use okrtrend::config::{Config, DEFAULT_CONFIG_FILE};
use okrtrend::entity::DeviceRecord;
use okrtrend::history::{FileSnapshotStore, SnapshotStore};
use okrtrend::report;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("okrtrend v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(&args) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .okrtrend.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize key results, capabilities, and thresholds.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load entity records from a JSON array.
fn load_entities(path: &Path) -> Result<Vec<DeviceRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read entities file: {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse entities file: {}", path.display()))
}

/// Score, compare and archive one run. Returns exit code (0 or 2).
fn run(args: &Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(args)?;
    config.merge_with_args(args);

    let key_results = config
        .key_result_set()
        .context("Invalid key result configuration")?;
    let mapping = config
        .field_mapping()
        .context("Invalid capability configuration")?;
    let thresholds = config.thresholds().context("Invalid status thresholds")?;
    let dimensions = config.dimensions().context("Invalid dimensions")?;
    let aggregation_config = config.aggregation_config();
    let trend_config = config.trend_config().context("Invalid trend settings")?;
    let series = config
        .burndown_series()
        .context("Invalid burndown configuration")?;

    let entities_path = args
        .entities
        .as_deref()
        .context("--entities is required")?;
    let records = load_entities(entities_path)?;
    info!(
        "Loaded {} entities from {}",
        records.len(),
        entities_path.display()
    );

    let as_of = args.run_timestamp();
    let aggregator = Aggregator::new(&key_results, Scorer::new(&thresholds), &aggregation_config)
        .with_series(&series);
    let run = aggregator.aggregate_all(&mapping.view_all(&records), &dimensions, as_of)?;

    let store = FileSnapshotStore::new(&config.general.history_dir);
    let analyzer = TrendAnalyzer::new(&trend_config, &key_results).with_series(&series);
    let run_report = report::build_run_report(&run, &analyzer, &store, as_of);

    if args.no_save {
        info!("--no-save set, archive left untouched");
    } else {
        let mut saved = 0;
        for snapshot in run.snapshots() {
            store.save(snapshot).with_context(|| {
                format!(
                    "Failed to archive {}={}",
                    snapshot.dimension_type, snapshot.dimension_value
                )
            })?;
            saved += 1;
        }
        info!(
            "Archived {} snapshot(s) under {}",
            saved,
            store.root().display()
        );
    }

    report::write_json_report(&run_report, &args.output)?;

    if !args.quiet {
        println!("{}", report::generate_summary(&run_report));
        println!(
            "✅ Report saved to: {} ({:.1}s)",
            args.output.display(),
            start_time.elapsed().as_secs_f64()
        );
    }

    let overall = run_report.overall.snapshot.status;
    if let Some(level) = args.fail_on {
        if level.is_hit(overall) {
            eprintln!(
                "\n⛔ Overall status {} is at or below {:?}. Failing (exit code 2).",
                overall, level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
