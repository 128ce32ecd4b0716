//! Wearlab CLI - Command-line interface for Wearlab
//!
//! Commands:
//! - summarize: Distributions, correlation grid and outcome of a batch result
//! - bands: Calendar-day overlays of a single-file result
//! - check-columns: Compare the column headers of local CSV files

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use wearlab::analysis::{align, build_report};
use wearlab::schema::{compare_schemas, ColumnSchema};
use wearlab::types::{AggregateResult, FeatureResult};
use wearlab::{FlattenMode, LabConfig, LabError, PRODUCER_NAME, WEARLAB_VERSION};

/// Environment variable holding the log filter
const LOG_ENV: &str = "WEARLAB_LOG";

/// Wearlab - feature summaries for wearable accelerometer data
#[derive(Parser)]
#[command(name = "wearlab")]
#[command(version = WEARLAB_VERSION)]
#[command(about = "Summarize processed accelerometer features", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a bulk processing result
    Summarize {
        /// Aggregate result JSON (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (default stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Key features by category.feature instead of pooling same-named features
        #[arg(long)]
        namespaced: bool,

        /// Configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },

    /// Align a single-file result to calendar days
    Bands {
        /// Feature result JSON (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Sampling epoch of the per-sample series, in seconds
        #[arg(long)]
        sample_unit_secs: Option<i64>,

        /// Configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },

    /// Check that CSV files share one column structure
    CheckColumns {
        /// CSV files to compare
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// Single JSON document
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_logging();
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

/// Logs go to stderr so stdout stays machine-readable
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), WearlabCliError> {
    match cli.command {
        Commands::Summarize {
            input,
            output,
            namespaced,
            config,
            output_format,
        } => cmd_summarize(&input, output.as_deref(), namespaced, config.as_deref(), output_format),

        Commands::Bands {
            input,
            sample_unit_secs,
            config,
            output_format,
        } => cmd_bands(&input, sample_unit_secs, config.as_deref(), output_format),

        Commands::CheckColumns {
            files,
            output_format,
        } => cmd_check_columns(&files, output_format),
    }
}

fn cmd_summarize(
    input: &Path,
    output: Option<&Path>,
    namespaced: bool,
    config_path: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), WearlabCliError> {
    let config = load_config(config_path)?;
    let mode = if namespaced {
        FlattenMode::Namespaced
    } else {
        config.flatten_mode
    };

    let result: AggregateResult = serde_json::from_str(&read_input(input)?)?;
    let report = build_report(&result, mode);
    info!(
        features = report.distributions.len(),
        rejected = report.rejected.len(),
        "batch summarized"
    );

    let rendered = match output_format {
        OutputFormat::Ndjson => {
            let mut lines = vec![serde_json::to_string(&serde_json::json!({
                "record": "outcome",
                "outcome": report.outcome,
                "message": report.message,
            }))?];
            for distribution in &report.distributions {
                lines.push(serde_json::to_string(&serde_json::json!({
                    "record": "distribution",
                    "distribution": distribution,
                }))?);
            }
            lines.push(serde_json::to_string(&serde_json::json!({
                "record": "correlation",
                "correlation": report.correlation,
            }))?);
            lines.join("\n") + "\n"
        }
        OutputFormat::Json => serde_json::to_string(&report)? + "\n",
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&report)? + "\n",
    };
    write_output(output, &rendered)
}

fn cmd_bands(
    input: &Path,
    sample_unit_secs: Option<i64>,
    config_path: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), WearlabCliError> {
    let mut config = load_config(config_path)?;
    if let Some(secs) = sample_unit_secs {
        if secs <= 0 {
            return Err(LabError::InputRejected(format!(
                "sample unit must be positive, got {}",
                secs
            ))
            .into());
        }
        config.sample_unit_secs = secs;
    }

    let result: FeatureResult = serde_json::from_str(&read_input(input)?)?;
    if result.data.is_empty() {
        return Err(WearlabCliError::NoSamples);
    }
    let aligned = align(&result, &config);
    debug!(days = aligned.days.len(), wear_bands = aligned.wear.len(), "recording aligned");

    let rendered = match output_format {
        OutputFormat::Ndjson => {
            let mut lines = Vec::with_capacity(aligned.days.len() + 1);
            lines.push(serde_json::to_string(&serde_json::json!({
                "record": "wear",
                "bands": aligned.wear,
            }))?);
            for day in &aligned.days {
                lines.push(serde_json::to_string(day)?);
            }
            lines.join("\n") + "\n"
        }
        OutputFormat::Json => serde_json::to_string(&aligned)? + "\n",
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&aligned)? + "\n",
    };
    write_output(None, &rendered)
}

fn cmd_check_columns(files: &[PathBuf], output_format: OutputFormat) -> Result<(), WearlabCliError> {
    let mut schemas = Vec::with_capacity(files.len());
    for path in files {
        let mut reader = csv::Reader::from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        debug!(file = %path.display(), columns = columns.len(), "headers read");
        schemas.push(ColumnSchema::new(path.display().to_string(), columns));
    }

    let verdict = compare_schemas(&schemas);
    let report = ColumnReport {
        producer: PRODUCER_NAME.to_string(),
        files: schemas,
        valid: verdict.valid,
        message: verdict.message.clone(),
    };
    let rendered = match output_format {
        OutputFormat::Ndjson | OutputFormat::Json => serde_json::to_string(&report)? + "\n",
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&report)? + "\n",
    };
    write_output(None, &rendered)?;

    if verdict.valid {
        Ok(())
    } else {
        Err(WearlabCliError::SchemaMismatch(verdict.message))
    }
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<LabConfig, WearlabCliError> {
    match path {
        Some(path) => Ok(LabConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(LabConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, WearlabCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: Option<&Path>, rendered: &str) -> Result<(), WearlabCliError> {
    match output {
        Some(path) if path.to_string_lossy() != "-" => fs::write(path, rendered)?,
        _ => {
            let mut stdout = io::stdout();
            write!(stdout, "{}", rendered)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

// Report types

#[derive(serde::Serialize)]
struct ColumnReport {
    producer: String,
    files: Vec<ColumnSchema>,
    valid: bool,
    message: String,
}

// Error types

#[derive(Debug)]
enum WearlabCliError {
    Io(io::Error),
    Lab(LabError),
    Json(serde_json::Error),
    Csv(csv::Error),
    SchemaMismatch(String),
    NoSamples,
}

impl From<io::Error> for WearlabCliError {
    fn from(e: io::Error) -> Self {
        WearlabCliError::Io(e)
    }
}

impl From<LabError> for WearlabCliError {
    fn from(e: LabError) -> Self {
        WearlabCliError::Lab(e)
    }
}

impl From<serde_json::Error> for WearlabCliError {
    fn from(e: serde_json::Error) -> Self {
        WearlabCliError::Json(e)
    }
}

impl From<csv::Error> for WearlabCliError {
    fn from(e: csv::Error) -> Self {
        WearlabCliError::Csv(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<WearlabCliError> for CliError {
    fn from(e: WearlabCliError) -> Self {
        match e {
            WearlabCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            WearlabCliError::Lab(e) => CliError {
                code: "LAB_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the configuration file and command options".to_string()),
            },
            WearlabCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Input must be a processing result as returned by the server".to_string()),
            },
            WearlabCliError::Csv(e) => CliError {
                code: "CSV_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Each file must be a CSV with a header row".to_string()),
            },
            WearlabCliError::SchemaMismatch(message) => CliError {
                code: "SCHEMA_MISMATCH".to_string(),
                message: LabError::ValidationFailure(message).to_string(),
                hint: Some("Upload only files exported with the same columns".to_string()),
            },
            WearlabCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "Result carries no per-sample data".to_string(),
                hint: Some("Use a single-file processing result".to_string()),
            },
        }
    }
}
