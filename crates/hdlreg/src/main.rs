use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use hdlreg::dispatch::Dispatcher;
use hdlreg::report::{self, InvocationInfo, SuiteReport};
use hdlreg::suite::{self, SuiteConfig};
use hdlreg_compare::{compare_files, ComparisonKind, Normalization};
use hdlreg_contracts::LOG_FILTER_ENV;
use hdlreg_runner::{install_signal_handlers, CleanupPolicy, DEFAULT_MAX_OUTPUT_BYTES};
use hdlreg_scenarios::ScenarioTag;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hdlreg")]
#[command(about = "Regression harness for the HDL compiler toolchain.", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run a suite of case files.
    Test(TestArgs),
    /// Compare one produced artifact against a golden file.
    Compare(CompareArgs),
}

#[derive(clap::Args, Debug)]
struct TestArgs {
    #[arg(long, value_name = "DIR", default_value = ".")]
    suite_dir: PathBuf,

    /// Glob, relative to the suite dir, selecting case files.
    #[arg(long, value_name = "GLOB", default_value = suite::DEFAULT_PATTERN)]
    pattern: String,

    #[arg(long, value_name = "SUBSTR")]
    filter: Option<String>,

    /// Run scenario; may be passed multiple times. Defaults to vlt.
    #[arg(long = "scenario", value_enum, value_name = "TAG")]
    scenarios: Vec<ScenarioTag>,

    #[arg(long, value_name = "N", default_value_t = 1)]
    jobs: usize,

    #[arg(long, value_name = "DIR", default_value = "obj_dir")]
    obj_root: PathBuf,

    /// Overrides $VERILATOR_ROOT.
    #[arg(long, value_name = "DIR")]
    toolchain_root: Option<PathBuf>,

    /// Backend executable to use instead of <toolchain root>/bin/verilator.
    #[arg(long, value_name = "PATH")]
    backend: Option<PathBuf>,

    /// Per-step timeout unless a case sets its own.
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = suite::DEFAULT_CASE_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout_secs: u64,

    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    suite_timeout_secs: Option<u64>,

    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,

    #[arg(long, value_enum, value_name = "POLICY", default_value_t = CleanupPolicy::default())]
    cleanup: CleanupPolicy,

    /// Print the planned `scenario/id` pairs and exit.
    #[arg(long)]
    list: bool,

    /// Print the JSON report instead of the text summary.
    #[arg(long)]
    json: bool,

    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,
}

impl TestArgs {
    fn suite_config(&self) -> SuiteConfig {
        SuiteConfig {
            suite_dir: self.suite_dir.clone(),
            pattern: self.pattern.clone(),
            filter: self.filter.clone(),
            scenarios: self.scenarios.clone(),
            jobs: self.jobs,
            obj_root: self.obj_root.clone(),
            toolchain_root: self.toolchain_root.clone(),
            backend: self.backend.clone(),
            case_timeout: Duration::from_secs(self.timeout_secs),
            suite_timeout: self.suite_timeout_secs.map(Duration::from_secs),
            max_output_bytes: self.max_output_bytes,
            cleanup: self.cleanup,
        }
    }
}

#[derive(clap::Args, Debug)]
struct CompareArgs {
    #[arg(long, value_enum, default_value_t = CompareKind::Text)]
    kind: CompareKind,

    /// Apply the toolchain log preset (CRLF, trailing whitespace, status lines) first.
    #[arg(long)]
    logfile: bool,

    actual: PathBuf,
    golden: PathBuf,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CompareKind {
    Text,
    Vcd,
    Coverage,
}

impl From<CompareKind> for ComparisonKind {
    fn from(kind: CompareKind) -> Self {
        match kind {
            CompareKind::Text => ComparisonKind::Text,
            CompareKind::Vcd => ComparisonKind::Trace,
            CompareKind::Coverage => ComparisonKind::AnnotatedCoverage,
        }
    }
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(report::EXIT_INTERNAL)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Test(args) => cmd_test(args),
        Command::Compare(args) => cmd_compare(args),
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be set when embedded; keep the existing one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn cmd_test(args: TestArgs) -> Result<ExitCode> {
    let started_at_unix_ms = unix_ms_now();
    let cfg = args.suite_config();
    let plan = suite::plan(&cfg)?;

    if args.list {
        for job in suite::list_jobs(&plan) {
            println!("{job}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    install_signal_handlers()?;
    let cancel = cfg.cancel_token();
    let outcome = suite::run_suite(&cfg, plan, &cancel)?;

    let invocation = InvocationInfo {
        argv: std::env::args().collect(),
        cwd: std::env::current_dir()
            .context("get current directory")?
            .display()
            .to_string(),
        started_at_unix_ms,
        jobs: cfg.jobs,
        suite_dir: suite::absolutize(&cfg.suite_dir)?.display().to_string(),
        scenarios: cfg.run_scenarios(),
        toolchain_root: Dispatcher::from_env(cfg.toolchain_root.clone(), None)
            .toolchain_root()
            .map(|p| p.display().to_string()),
        cleanup: cfg.cleanup.as_str().to_string(),
    };
    let report = report::finalize_report(
        invocation,
        outcome.elapsed,
        outcome.cases,
        outcome.aborted.as_deref(),
    );
    let exit_code = report::compute_exit_code(&report);
    write_report_and_exit(&args, &report, exit_code)
}

fn write_report_and_exit(
    args: &TestArgs,
    report: &SuiteReport,
    exit_code: u8,
) -> Result<ExitCode> {
    if let Some(out_path) = &args.report_out {
        report::write_report(out_path, report)?;
        eprintln!(
            "hdlreg: passed={} failed={} skipped={} (exit={})",
            report.summary.passed, report.summary.failed, report.summary.skipped, exit_code
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report::render_text(report, exit_code));
    }
    Ok(ExitCode::from(exit_code))
}

fn cmd_compare(args: CompareArgs) -> Result<ExitCode> {
    let norm = if args.logfile {
        Normalization::logfile()
    } else {
        Normalization::default()
    };
    let result = compare_files(args.kind.into(), &args.actual, &args.golden, &norm)?;
    println!("{}", result.describe());
    if result.is_identical() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
