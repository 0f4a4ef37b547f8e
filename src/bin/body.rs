//! Body CLI - Command-line interface for Synheart Body
//!
//! Commands:
//! - record: Record a raw measurement and update derived metrics
//! - delete: Delete a raw measurement by exact value and timestamp
//! - history: Print the history of a raw or derived metric
//! - profile: Print the latest value of every raw metric
//! - rebuild: Rebuild every derived series from raw data
//! - match: Show the companion sample chosen for a date
//! - doctor: Diagnose configuration and store health

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use synheart_body::{
    DerivedMetric, EngineConfig, InMemoryStore, MetricName, MetricStore, MetricsError, RawMetric,
    RecomputeEngine, Sample, StoreError, BODY_VERSION, PRODUCER_NAME,
};

/// Body - On-device body composition engine
#[derive(Parser)]
#[command(name = "body")]
#[command(author = "Synheart AI Inc")]
#[command(version = BODY_VERSION)]
#[command(about = "Track body measurements and derived composition metrics", long_about = None)]
struct Cli {
    /// Store file path (defaults to the configured store path)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Config file path (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a raw measurement
    Record {
        /// Raw metric (weight, height, body_fat, waist, bicep, chest, thigh, shoulder)
        metric: String,

        /// Value in the metric's unit (kg, cm or %)
        value: String,

        /// Measurement time (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Delete a raw measurement by exact value and timestamp
    Delete {
        /// Raw metric
        metric: String,

        /// Exact stored value
        value: f64,

        /// Exact stored timestamp (RFC 3339)
        #[arg(long)]
        at: String,
    },

    /// Print the history of a metric (derived histories are rebuilt first)
    History {
        /// Raw or derived metric (e.g. weight, bmi, "Lean Body Mass")
        metric: String,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        format: OutputFormat,
    },

    /// Print the latest value of every raw metric
    Profile,

    /// Rebuild every derived series from raw data
    Rebuild,

    /// Show the companion sample the engine would pair with a date
    Match {
        /// Raw metric
        metric: String,

        /// Target time (RFC 3339)
        #[arg(long)]
        at: String,
    },

    /// Diagnose configuration and store health
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one sample per line)
    Ndjson,
    /// JSON array of samples
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BodyCliError> {
    let config_path = cli.config.as_deref();
    let store_path = cli.store.as_deref();

    match cli.command {
        Commands::Record { metric, value, at } => {
            let (mut engine, store_path) = open_engine(config_path, store_path)?;
            let metric: RawMetric = metric.parse()?;
            let at = match at {
                Some(s) => parse_timestamp(&s)?,
                None => Utc::now(),
            };
            engine.on_raw_input(metric, &value, at)?;
            engine.store().save_file(&store_path)?;
            println!("{}", serde_json::to_string(&engine.profile_snapshot()?)?);
        }

        Commands::Delete { metric, value, at } => {
            let (mut engine, store_path) = open_engine(config_path, store_path)?;
            let metric: RawMetric = metric.parse()?;
            let at = parse_timestamp(&at)?;
            engine.on_delete(metric, &Sample::raw(metric, value, at))?;
            engine.store().save_file(&store_path)?;
        }

        Commands::History { metric, format } => {
            let (mut engine, store_path) = open_engine(config_path, store_path)?;
            let samples = match metric.parse::<MetricName>()? {
                MetricName::Raw(m) => engine.raw_history(m)?,
                MetricName::Derived(m) => {
                    let samples = engine.try_history(m)?;
                    engine.store().save_file(&store_path)?;
                    samples
                }
            };
            print!("{}", format_output(&samples, &format)?);
        }

        Commands::Profile => {
            let (engine, _) = open_engine(config_path, store_path)?;
            println!("{}", serde_json::to_string_pretty(&engine.profile_snapshot()?)?);
        }

        Commands::Rebuild => {
            let (mut engine, store_path) = open_engine(config_path, store_path)?;
            let summary = engine.rebuild_all()?;
            engine.store().save_file(&store_path)?;
            println!("{}", serde_json::to_string(&summary)?);
        }

        Commands::Match { metric, at } => {
            let (engine, _) = open_engine(config_path, store_path)?;
            let metric: RawMetric = metric.parse()?;
            let at = parse_timestamp(&at)?;
            let companion = engine.companion(metric, at)?;
            println!("{}", serde_json::to_string_pretty(&companion)?);
        }

        Commands::Doctor { json } => cmd_doctor(config_path, store_path, json)?,
    }

    Ok(())
}

/// Load config and store, returning the engine and the store file it came from
fn open_engine(
    config_path: Option<&Path>,
    store_path: Option<&Path>,
) -> Result<(RecomputeEngine, PathBuf), BodyCliError> {
    let config = load_config(config_path)?;
    let store_path = store_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.store_path.clone());
    let store = InMemoryStore::load_file(&store_path)?;
    Ok((RecomputeEngine::from_config(&config, store)?, store_path))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, BodyCliError> {
    Ok(match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, BodyCliError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BodyCliError::Timestamp(format!("{s:?}: {e}")))
}

fn cmd_doctor(config_path: Option<&Path>, store_path: Option<&Path>, json: bool) -> Result<(), BodyCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", PRODUCER_NAME, BODY_VERSION),
    });

    let config = match load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Matching window ±{}h, BMR age {} ({:?})",
                    config.match_window_hours, config.bmr.age_years, config.bmr.sex
                ),
            });
            config
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid configuration: {}", CliError::from(e).message),
            });
            EngineConfig::default()
        }
    };

    let store_path = store_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.store_path.clone());

    if !store_path.exists() {
        checks.push(DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Warning,
            message: format!("Store file {} does not exist yet", store_path.display()),
        });
    } else {
        match InMemoryStore::load_file(&store_path) {
            Ok(store) => {
                checks.push(DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} samples in {}", store.len(), store_path.display()),
                });
                checks.push(check_derived_anchors(&store));
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read store: {}", e),
                });
            }
        }
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: BODY_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Body Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BodyCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Derived samples must sit on weight timestamps, one per metric per date
fn check_derived_anchors(store: &InMemoryStore) -> DoctorCheck {
    let anchors: BTreeSet<DateTime<Utc>> = match store.query(RawMetric::Weight.into()) {
        Ok(weights) => weights.iter().map(|s| s.timestamp).collect(),
        Err(e) => {
            return DoctorCheck {
                name: "derived".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot read weight series: {}", e),
            }
        }
    };

    let mut problems = Vec::new();
    for metric in DerivedMetric::ALL {
        let series = store.query(metric.into()).unwrap_or_default();
        let dates: BTreeSet<_> = series.iter().map(|s| s.timestamp).collect();

        let orphans = dates.difference(&anchors).count();
        if orphans > 0 {
            problems.push(format!("{} orphaned {}", orphans, metric.as_str()));
        }
        if dates.len() != series.len() {
            problems.push(format!("duplicate {} dates", metric.as_str()));
        }
    }

    if problems.is_empty() {
        DoctorCheck {
            name: "derived".to_string(),
            status: CheckStatus::Ok,
            message: format!("Derived series consistent with {} weight dates", anchors.len()),
        }
    } else {
        DoctorCheck {
            name: "derived".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} (run 'body rebuild')", problems.join(", ")),
        }
    }
}

// Helper functions

fn format_output(samples: &[Sample], format: &OutputFormat) -> Result<String, BodyCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for sample in samples {
                out.push_str(&serde_json::to_string(sample)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(samples)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(samples)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum BodyCliError {
    Metrics(MetricsError),
    Store(StoreError),
    Json(serde_json::Error),
    Timestamp(String),
    DoctorFailed,
}

impl From<MetricsError> for BodyCliError {
    fn from(e: MetricsError) -> Self {
        BodyCliError::Metrics(e)
    }
}

impl From<StoreError> for BodyCliError {
    fn from(e: StoreError) -> Self {
        BodyCliError::Store(e)
    }
}

impl From<serde_json::Error> for BodyCliError {
    fn from(e: serde_json::Error) -> Self {
        BodyCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BodyCliError> for CliError {
    fn from(e: BodyCliError) -> Self {
        match e {
            BodyCliError::Metrics(MetricsError::InvalidValue { metric, input }) => CliError {
                code: "INVALID_VALUE".to_string(),
                message: format!("{input:?} is not a number for {metric}"),
                hint: Some("Enter a plain decimal number, e.g. 72.5".to_string()),
            },
            BodyCliError::Metrics(MetricsError::OutOfRange { metric, value }) => CliError {
                code: "OUT_OF_RANGE".to_string(),
                message: format!("{value} is out of range for {metric}"),
                hint: Some("Check the unit: weight in kg, lengths in cm, body fat in %".to_string()),
            },
            BodyCliError::Metrics(MetricsError::UnknownMetric(name)) => CliError {
                code: "UNKNOWN_METRIC".to_string(),
                message: format!("Unknown metric: {name}"),
                hint: Some(
                    "Raw: weight, height, body_fat, waist, bicep, chest, thigh, shoulder. \
                     Derived: bmi, lean_body_mass, fat_mass, ffmi, bmr, bsa"
                        .to_string(),
                ),
            },
            BodyCliError::Metrics(MetricsError::NotFound(what)) => CliError {
                code: "NOT_FOUND".to_string(),
                message: format!("No sample matches {what}"),
                hint: Some("Use 'body history <metric>' to see exact stored values".to_string()),
            },
            BodyCliError::Metrics(MetricsError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'body doctor' to inspect the configuration".to_string()),
            },
            BodyCliError::Metrics(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BodyCliError::Store(e) => CliError {
                code: "STORE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the store path and permissions".to_string()),
            },
            BodyCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BodyCliError::Timestamp(msg) => CliError {
                code: "INVALID_TIMESTAMP".to_string(),
                message: msg,
                hint: Some("Use RFC 3339, e.g. 2024-01-15T08:00:00Z".to_string()),
            },
            BodyCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
