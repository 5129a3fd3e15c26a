//! Fourier Series Verifier CLI
//!
//! The `fourier` command derives Fourier series with a model and checks them
//! against a numerical oracle.
//!
//! ## Commands
//!
//! - `run`: run the derive, translate, verify loop against the live model
//! - `verify`: compare hand-written sources or coefficients offline
//! - `extract`: run the structured-response extractor on a file

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tracing::{info, Level};

use fourier_core::obs::RunSpan;
use fourier_core::oracle::SamplingPlan;
use fourier_core::{
    AnthropicConfig, AnthropicGateway, Coefficients, EngineConfig, Extractor, FsSessionLog,
    NumericalOracle, Orchestrator, ResponseShape, RunEvent, RunRequest, TranslationMode,
    Verification,
};

#[derive(Parser)]
#[command(name = "fourier")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LLM-derived Fourier series with numerical verification", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive, translate and verify a Fourier series
    Run {
        /// Function expression in t, e.g. "np.where(np.sin(t) >= 0, 1.0, -1.0)"
        #[arg(short, long)]
        function: String,

        /// Period of the function
        #[arg(short, long)]
        period: f64,

        /// Number of harmonics
        #[arg(short, long)]
        terms: u32,

        /// Translation mode (functions or coefficients)
        #[arg(long)]
        mode: Option<TranslationMode>,

        /// Iteration ceiling
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Relative-error threshold
        #[arg(long)]
        threshold: Option<f64>,

        /// Zero threshold for relative error
        #[arg(long)]
        zero_threshold: Option<f64>,

        /// Write a session log under this directory
        #[arg(long, env = "FOURIER_SESSIONS_DIR")]
        sessions_dir: Option<PathBuf>,

        /// Output format of the event stream
        #[arg(long, value_enum, default_value = "pretty")]
        format: OutputFormat,
    },

    /// Verify a reconstruction against an original function, offline
    Verify {
        /// Source defining f(t); prefix with @ to read a file
        #[arg(long)]
        original: String,

        /// Source defining reconstruct(t); prefix with @ to read a file
        #[arg(long, conflicts_with = "coefficients", required_unless_present = "coefficients")]
        reconstruction: Option<String>,

        /// Coefficients as JSON: {"a0": .., "an": [..], "bn": [..]}
        #[arg(long)]
        coefficients: Option<String>,

        /// Period of the function
        #[arg(short, long)]
        period: f64,

        /// Relative-error threshold
        #[arg(long, default_value = "0.05")]
        threshold: f64,

        /// Below this magnitude the original counts as zero and absolute error is used
        #[arg(long, default_value = "1e-6")]
        zero_threshold: f64,

        /// Periods to sample
        #[arg(long, default_value = "2")]
        periods: u32,

        /// Sample points across all periods
        #[arg(long, default_value = "500")]
        points: usize,
    },

    /// Parse a model reply file with the structured-response extractor
    Extract {
        /// File holding the raw reply
        file: PathBuf,

        /// Expected shape
        #[arg(long, value_enum, default_value = "any")]
        shape: ShapeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One JSON event per line
    Ndjson,
    /// Server-sent events framing
    Sse,
    /// Human-readable progress
    Pretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum ShapeArg {
    Translation,
    Coefficients,
    Analysis,
    Any,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    fourier_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            function,
            period,
            terms,
            mode,
            max_iterations,
            threshold,
            zero_threshold,
            sessions_dir,
            format,
        } => {
            let mut config = EngineConfig::from_env().context("invalid FOURIER_* configuration")?;
            if let Some(mode) = mode {
                config.translation_mode = mode;
            }
            if let Some(n) = max_iterations {
                config.max_iterations = n;
            }
            if let Some(t) = threshold {
                config.error_threshold = t;
            }
            if let Some(z) = zero_threshold {
                config.zero_threshold = z;
            }
            let request = RunRequest::new(function, period, terms, config.max_terms)?;
            cmd_run(config, request, sessions_dir.as_deref(), format).await
        }
        Commands::Verify {
            original,
            reconstruction,
            coefficients,
            period,
            threshold,
            zero_threshold,
            periods,
            points,
        } => cmd_verify(
            &original,
            reconstruction.as_deref(),
            coefficients.as_deref(),
            period,
            threshold,
            zero_threshold,
            SamplingPlan { periods, points },
        ),
        Commands::Extract { file, shape } => cmd_extract(&file, shape).await,
    }
}

async fn cmd_run(
    config: EngineConfig,
    request: RunRequest,
    sessions_dir: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let anthropic = AnthropicConfig::from_env().context("model credentials not configured")?;
    let gateway = Arc::new(AnthropicGateway::new(anthropic)?);

    let mut orchestrator = Orchestrator::new(config, gateway)?;
    if let Some(dir) = sessions_dir {
        info!(dir = %dir.display(), "writing session log");
        orchestrator = orchestrator.with_session_sink(Arc::new(FsSessionLog::new(dir)));
    }

    let mut events = orchestrator.run(request);
    let mut stdout = std::io::stdout().lock();
    let mut outcome = None;
    while let Some(event) = events.next().await {
        match format {
            OutputFormat::Ndjson => writeln!(stdout, "{}", serde_json::to_string(&event)?)?,
            OutputFormat::Sse => write!(
                stdout,
                "event: {}\ndata: {}\n\n",
                event.kind(),
                serde_json::to_string(&event)?
            )?,
            OutputFormat::Pretty => print_pretty(&mut stdout, &event)?,
        }
        stdout.flush()?;
        if let Some(result) = event.outcome() {
            outcome = Some(result.clone());
        }
    }

    match outcome {
        Some(result) if result.success => Ok(()),
        Some(result) => bail!("run ended with status {}", result.status),
        None => bail!("run ended without an outcome"),
    }
}

fn print_pretty(out: &mut impl Write, event: &RunEvent) -> std::io::Result<()> {
    match event {
        RunEvent::SessionCreated { session_id } => writeln!(out, "session {session_id}"),
        RunEvent::IterationStart { iteration } => writeln!(out, "\n=== iteration {iteration} ==="),
        RunEvent::DerivationChunk { content, .. } => write!(out, "{content}"),
        RunEvent::DerivationComplete { .. } => writeln!(out),
        RunEvent::CodeGenerated {
            parse_strategy,
            warnings,
            ..
        } => {
            writeln!(out, "code generated (parsed via {parse_strategy})")?;
            for w in warnings {
                writeln!(out, "  warning: {w}")?;
            }
            Ok(())
        }
        RunEvent::VerificationResult { result, .. } => print_verification(out, result),
        RunEvent::ErrorAnalysis { analysis, .. } => writeln!(
            out,
            "analysis: {} / {}\n  {}\n  suggestion: {}",
            analysis.error_category,
            analysis.severity,
            analysis.explanation,
            analysis.suggestion_to_user
        ),
        RunEvent::IterationError { iteration, error } => {
            writeln!(out, "iteration {iteration} failed: {error}")
        }
        RunEvent::Success { result } | RunEvent::SuccessWithWarning { result } => writeln!(
            out,
            "\n{} after {} iteration(s) in {} ms",
            result.status, result.iterations, result.timing.duration_ms
        ),
        RunEvent::Failed { reason, .. } => writeln!(out, "\nfailed: {reason}"),
        RunEvent::MaxIterationsReached { iterations, .. } => {
            writeln!(out, "\nno verified result after {iterations} iteration(s)")
        }
    }
}

fn print_verification(out: &mut impl Write, verification: &Verification) -> std::io::Result<()> {
    match verification {
        Verification::Completed(result) => {
            let m = &result.error_metrics;
            writeln!(
                out,
                "verification {}: max relative error {:.4}%, pattern {}, peak at t={:.4}",
                if result.is_verified { "passed" } else { "failed" },
                m.max_relative_error * 100.0,
                m.error_pattern,
                m.max_error_location
            )
        }
        Verification::EvaluationFailed(failure) => writeln!(
            out,
            "verification failed ({}): {}",
            failure.error_type.as_str(),
            failure.error_message
        ),
    }
}

fn cmd_verify(
    original: &str,
    reconstruction: Option<&str>,
    coefficients: Option<&str>,
    period: f64,
    threshold: f64,
    zero_threshold: f64,
    plan: SamplingPlan,
) -> Result<()> {
    let _span = RunSpan::enter("offline-verify");
    let oracle = NumericalOracle::new(threshold, zero_threshold, plan);
    let original = read_source(original)?;

    let verification = match (reconstruction, coefficients) {
        (Some(src), _) => oracle.verify_functions(&original, &read_source(src)?, period),
        (None, Some(json)) => {
            let coefficients: Coefficients =
                serde_json::from_str(json).context("Failed to parse coefficients as JSON")?;
            oracle.verify_coefficients(&original, &coefficients, period)
        }
        (None, None) => bail!("either --reconstruction or --coefficients is required"),
    };

    println!("{}", serde_json::to_string_pretty(&verification)?);
    if !verification.is_verified() {
        bail!("reconstruction not verified");
    }
    Ok(())
}

async fn cmd_extract(file: &Path, shape: ShapeArg) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read reply file: {}", file.display()))?;
    let shape = match shape {
        ShapeArg::Translation => ResponseShape::translation(TranslationMode::Functions),
        ShapeArg::Coefficients => ResponseShape::translation(TranslationMode::Coefficients),
        ShapeArg::Analysis => ResponseShape::analysis(),
        ShapeArg::Any => ResponseShape::any(),
    };

    match Extractor::new().extract(&raw, &shape).await {
        Ok(extraction) => {
            println!("{}", serde_json::to_string_pretty(&extraction)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.attempts)?);
            Err(err.into())
        }
    }
}

/// Literal source, or the contents of a file when prefixed with `@`.
fn read_source(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file: {path}")),
        None => Ok(arg.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_requires_one_reconstruction() {
        let missing = Cli::try_parse_from(["fourier", "verify", "--original", "np.sin(t)", "-p", "6.28"]);
        assert!(missing.is_err());

        let both = Cli::try_parse_from([
            "fourier",
            "verify",
            "--original",
            "np.sin(t)",
            "--reconstruction",
            "np.sin(t)",
            "--coefficients",
            "{}",
            "-p",
            "6.28",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn test_verify_zero_threshold_flag() {
        let cli = Cli::try_parse_from([
            "fourier", "verify", "--original", "0.001", "--reconstruction", "0.0015", "-p", "1",
        ])
        .expect("parse");
        match cli.command {
            Commands::Verify { zero_threshold, .. } => assert_eq!(zero_threshold, 1e-6),
            _ => panic!("expected verify"),
        }

        let plan = SamplingPlan::default();
        assert!(cmd_verify("0.001", Some("0.0015"), None, 1.0, 0.05, 1e-6, plan).is_err());
        assert!(cmd_verify("0.001", Some("0.0015"), None, 1.0, 0.05, 0.01, plan).is_ok());
    }

    #[test]
    fn test_run_parses_mode() {
        let cli = Cli::try_parse_from([
            "fourier", "run", "-f", "np.sin(t)", "-p", "6.28", "-t", "3", "--mode", "coefficients",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run { mode, terms, .. } => {
                assert_eq!(mode, Some(TranslationMode::Coefficients));
                assert_eq!(terms, 3);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_read_source_literal_and_file() {
        assert_eq!(read_source("np.sin(t)").expect("literal"), "np.sin(t)");
        let dir = std::env::temp_dir().join(format!("fourier-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("f.py");
        std::fs::write(&path, "def f(t):\n    return t").expect("write");
        let arg = format!("@{}", path.display());
        assert_eq!(read_source(&arg).expect("file"), "def f(t):\n    return t");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_pretty_output() {
        let mut buf = Vec::new();
        print_pretty(&mut buf, &RunEvent::IterationStart { iteration: 2 }).expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "\n=== iteration 2 ===\n");
    }
}
