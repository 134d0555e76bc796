//! kcandles - Command-line interface for KinetiCandles
//!
//! Commands:
//! - candles: Bin raw records into OHLC candles
//! - analyze: Run the full pipeline and print the encoded report
//! - validate: Validate raw records
//! - templates: Print the pattern library guide
//! - doctor: Check configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use kinetic_candles::config::{parse_epoch, EngineConfig};
use kinetic_candles::encoder::{ReportEncoder, REPORT_VERSION};
use kinetic_candles::ingest::{parse_array, parse_ndjson, MalformedSample, RawLine, SampleIngestor};
use kinetic_candles::patterns::PatternLibrary;
use kinetic_candles::pipeline::KineticsEngine;
use kinetic_candles::types::{CandleSeries, Resolution};
use kinetic_candles::{EngineError, ENGINE_VERSION, PRODUCER_NAME};

/// kcandles - OHLC candles and movement patterns from activity streams
#[derive(Parser)]
#[command(name = "kcandles")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Turn multi-device activity samples into candles and movement patterns", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bin raw records into candles
    Candles {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Candle width: second, minute, hour, day, week or <n>s
        #[arg(short, long)]
        resolution: Option<Resolution>,

        /// Alignment anchor (RFC 3339 or "YYYY-MM-DD HH:MM:SS", UTC)
        #[arg(long)]
        epoch: Option<String>,
    },

    /// Run the full pipeline and print the report
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Candle width for the report's series
        #[arg(short, long)]
        resolution: Option<Resolution>,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Validate raw records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the pattern library
    Templates {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one candle per line)
    Ndjson,
    /// The candle series as one JSON object
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

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

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), KcCliError> {
    match cli.command {
        Commands::Candles {
            input,
            output,
            input_format,
            output_format,
            config,
            resolution,
            epoch,
        } => cmd_candles(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            resolution,
            epoch.as_deref(),
        ),
        Commands::Analyze {
            input,
            output,
            input_format,
            config,
            resolution,
            pretty,
        } => cmd_analyze(&input, &output, input_format, config.as_deref(), resolution, pretty),
        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
        Commands::Templates { json } => cmd_templates(json),
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_candles(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    resolution: Option<Resolution>,
    epoch: Option<&str>,
) -> Result<(), KcCliError> {
    let mut config = load_config(config)?;
    if let Some(resolution) = resolution {
        config.candles.resolution = resolution;
    }
    if let Some(epoch) = epoch {
        config.candles.epoch_alignment = Some(parse_epoch(epoch)?);
    }

    let lines = read_lines(input, &input_format)?;
    if lines.is_empty() {
        return Err(KcCliError::NoRecords);
    }

    let engine = KineticsEngine::new(config)?;
    let report = engine.ingest_lines(&lines)?;
    let stream = engine.canonical_stream(&report.into_streams())?;
    let series = engine.candles(&stream, None)?.into_result()?;

    write_output(output, &format_candles(&series, &output_format)?)
}

fn cmd_analyze(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    config: Option<&Path>,
    resolution: Option<Resolution>,
    pretty: bool,
) -> Result<(), KcCliError> {
    let mut config = load_config(config)?;
    if let Some(resolution) = resolution {
        config.candles.resolution = resolution;
    }

    let lines = read_lines(input, &input_format)?;
    if lines.is_empty() {
        return Err(KcCliError::NoRecords);
    }

    let analysis = KineticsEngine::new(config)?.analyze_lines(&lines)?;
    let mut json = ReportEncoder::new().pretty(pretty).encode_to_json(&analysis)?;
    json.push('\n');
    write_output(output, &json)
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), KcCliError> {
    let lines = read_lines(input, &input_format)?;
    let ingest = SampleIngestor::new(&Default::default()).ingest_lines(&lines)?;

    let report = ValidationReport {
        total_records: lines.len(),
        valid_records: ingest.accepted,
        invalid_records: ingest.rejected.len(),
        devices: ingest.streams.keys().cloned().collect(),
        errors: ingest.rejected,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);
        println!("Devices:         {}", report.devices.join(", "));

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Record {} (device {}): {}",
                    err.index,
                    err.device_id.as_deref().unwrap_or("unknown"),
                    err.reason
                );
            }
        }
    }

    if report.invalid_records > 0 {
        Err(KcCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_templates(json: bool) -> Result<(), KcCliError> {
    let library = PatternLibrary::builtin(&EngineConfig::default().patterns.thresholds);
    if json {
        println!("{}", serde_json::to_string_pretty(library.templates())?);
    } else {
        print!("{}", library.guide());
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), KcCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck {
            name: "engine_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("{PRODUCER_NAME} {ENGINE_VERSION}"),
        },
        DoctorCheck {
            name: "report_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Report schema {REPORT_VERSION}"),
        },
    ];

    match config {
        Some(path) if !path.exists() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: format!("Config file {} does not exist", path.display()),
        }),
        Some(path) => checks.push(match EngineConfig::from_file(path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (resolution {}, imputation {:?})",
                    config.candles.resolution, config.impute.policy
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config: {e}"),
            },
        }),
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "No config file given; defaults apply".to_string(),
        }),
    }

    let template_count = PatternLibrary::builtin(&EngineConfig::default().patterns.thresholds).len();
    checks.push(DoctorCheck {
        name: "templates".to_string(),
        status: CheckStatus::Ok,
        message: format!("{template_count} built-in templates"),
    });

    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (use --input -)".to_string(),
        }
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("kcandles Doctor Report");
        println!("======================");
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

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(KcCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<EngineConfig, KcCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn read_lines(input: &Path, format: &InputFormat) -> Result<Vec<RawLine>, KcCliError> {
    let data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    Ok(match format {
        InputFormat::Ndjson => parse_ndjson(&data),
        InputFormat::Json => parse_array(&data)?.into_iter().map(RawLine::Record).collect(),
    })
}

fn write_output(output: &Path, data: &str) -> Result<(), KcCliError> {
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(data.as_bytes())?;
        stdout.flush()?;
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn format_candles(series: &CandleSeries, format: &OutputFormat) -> Result<String, KcCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for candle in &series.candles {
                out.push_str(&serde_json::to_string(candle)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(series)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(series)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum KcCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for KcCliError {
    fn from(e: io::Error) -> Self {
        KcCliError::Io(e)
    }
}

impl From<EngineError> for KcCliError {
    fn from(e: EngineError) -> Self {
        KcCliError::Engine(e)
    }
}

impl From<serde_json::Error> for KcCliError {
    fn from(e: serde_json::Error) -> Self {
        KcCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<KcCliError> for CliError {
    fn from(e: KcCliError) -> Self {
        match e {
            KcCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            KcCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::MalformedSample { .. } => {
                        ("MALFORMED_SAMPLE", "Run 'kcandles validate' for details")
                    }
                    EngineError::UnitMismatch { .. } => (
                        "UNIT_MISMATCH",
                        "Declare a sync.unit_conversions entry or a common unit",
                    ),
                    EngineError::InvalidConfig(_) => ("INVALID_CONFIG", "Run 'kcandles doctor --config <file>'"),
                    EngineError::EmptyStream => ("EMPTY_STREAM", "Ensure the input holds at least one valid record"),
                    EngineError::TooManyPeriods { .. } => (
                        "RANGE_TOO_LARGE",
                        "Check record timestamps are epoch seconds, or raise candles.max_candles",
                    ),
                    EngineError::Cancelled { .. } => ("CANCELLED", "Retry the operation"),
                    EngineError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    _ => ("ENGINE_ERROR", "Check input records and configuration"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            KcCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            KcCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            KcCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{count} records failed validation"),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            KcCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    devices: Vec<String>,
    errors: Vec<MalformedSample>,
}

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
