//! Verdicts, the suite report, and the process exit code.

use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine as _;
use hdlreg_contracts::REPORT_SCHEMA_VERSION;
use hdlreg_scenarios::ScenarioTag;
use serde::Serialize;

use crate::error::{ErrorKind, HarnessError};
use crate::pipeline::{CaseRun, ComparisonRecord, ExpectCheck, StepKind, StepOutcome, StepResult};

pub const EXIT_PASS: u8 = 0;
pub const EXIT_INTERNAL: u8 = 2;
pub const EXIT_ABORTED: u8 = 3;
pub const EXIT_FAILURES: u8 = 10;

/// First failing step or comparison, with what is needed to reproduce it by hand.
#[derive(Debug, Clone, Serialize)]
pub struct FailReason {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub detail: String,
}

impl FailReason {
    pub fn from_error(err: &HarnessError, steps: &[StepResult]) -> Self {
        let step = err.step_label().map(str::to_string);
        let launched = step
            .as_deref()
            .and_then(|label| steps.iter().rev().find(|s| s.label == label));
        Self {
            kind: err.kind(),
            step,
            command: launched.map(|s| s.command_line.clone()),
            exit_code: launched.and_then(StepResult::exit_code),
            detail: err.detail(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail(FailReason),
    Skip { reason: String },
}

impl Verdict {
    pub fn status(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail(_) => "fail",
            Verdict::Skip { .. } => "skip",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Verdict::Skip {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSection {
    pub label: String,
    pub kind: StepKind,
    pub argv: Vec<String>,
    pub cwd: String,
    pub outcome: StepOutcome,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<i32>,
    pub duration_ms: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub stdout_b64: String,
    pub stderr_b64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect_check: Option<ExpectCheck>,
}

impl StepSection {
    fn from_step_result(r: &StepResult) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        Self {
            label: r.label.clone(),
            kind: r.kind,
            argv: r.argv.clone(),
            cwd: display_path(&r.cwd),
            outcome: r.outcome,
            exit_code: r.exit_status,
            exit_signal: r.exit_signal,
            duration_ms: r.duration.as_millis() as u64,
            stdout_truncated: r.stdout_truncated,
            stderr_truncated: r.stderr_truncated,
            stdout_b64: b64.encode(&r.stdout),
            stderr_b64: b64.encode(&r.stderr),
            log_path: r.log_path.as_deref().map(display_path),
            expect_check: r.expect_check.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub id: String,
    /// `None` for a case that failed to load (no run scenario was picked).
    pub scenario: Option<ScenarioTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared: Option<ScenarioTag>,
    pub case_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obj_dir: Option<String>,
    pub obj_dir_kept: bool,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comparisons: Vec<ComparisonRecord>,
}

impl CaseReport {
    /// Report for a case with no run: load failure, skip, or never started.
    pub fn without_run(
        id: impl Into<String>,
        scenario: Option<ScenarioTag>,
        case_path: &Path,
        verdict: Verdict,
    ) -> Self {
        Self {
            id: id.into(),
            scenario,
            declared: None,
            case_path: display_path(case_path),
            obj_dir: None,
            obj_dir_kept: false,
            duration_ms: 0,
            verdict,
            steps: Vec::new(),
            comparisons: Vec::new(),
        }
    }

    pub fn from_run(
        id: impl Into<String>,
        scenario: ScenarioTag,
        declared: ScenarioTag,
        case_path: &Path,
        obj_dir: &Path,
        obj_dir_kept: bool,
        run: CaseRun,
    ) -> Self {
        Self {
            id: id.into(),
            scenario: Some(scenario),
            declared: Some(declared),
            case_path: display_path(case_path),
            obj_dir: Some(display_path(obj_dir)),
            obj_dir_kept,
            duration_ms: run.duration.as_millis() as u64,
            verdict: run.verdict,
            steps: run.steps.iter().map(StepSection::from_step_result).collect(),
            comparisons: run.comparisons,
        }
    }

    /// `scenario/id`, the name a case is listed under.
    pub fn display_name(&self) -> String {
        match self.scenario {
            Some(s) => format!("{s}/{}", self.id),
            None => format!("-/{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration_ms: u64,
    pub configuration_errors: u64,
    pub unexpected_failures: u64,
    pub timeouts: u64,
    pub comparison_mismatches: u64,
    pub preceding_step_failures: u64,
    pub cancelled: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationInfo {
    pub argv: Vec<String>,
    pub cwd: String,
    pub started_at_unix_ms: u64,
    pub jobs: usize,
    pub suite_dir: String,
    pub scenarios: Vec<ScenarioTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain_root: Option<String>,
    pub cleanup: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub schema_version: &'static str,
    pub tool: ToolInfo,
    pub invocation: InvocationInfo,
    pub summary: Summary,
    pub cases: Vec<CaseReport>,
}

/// Count verdicts and sort cases by id, then scenario.
pub fn finalize_report(
    invocation: InvocationInfo,
    elapsed: std::time::Duration,
    mut cases: Vec<CaseReport>,
    aborted: Option<&str>,
) -> SuiteReport {
    cases.sort_by(|a, b| a.id.cmp(&b.id).then(a.scenario.cmp(&b.scenario)));

    let mut summary = Summary {
        duration_ms: elapsed.as_millis() as u64,
        aborted: aborted.map(str::to_string),
        ..Summary::default()
    };
    for c in &cases {
        match &c.verdict {
            Verdict::Pass => summary.passed += 1,
            Verdict::Skip { .. } => summary.skipped += 1,
            Verdict::Fail(reason) => {
                summary.failed += 1;
                match reason.kind {
                    ErrorKind::Configuration | ErrorKind::Internal => {
                        summary.configuration_errors += 1
                    }
                    ErrorKind::UnexpectedFailure => summary.unexpected_failures += 1,
                    ErrorKind::Timeout => summary.timeouts += 1,
                    ErrorKind::ComparisonMismatch => summary.comparison_mismatches += 1,
                    ErrorKind::PrecedingStepFailed => summary.preceding_step_failures += 1,
                    ErrorKind::Cancelled => summary.cancelled += 1,
                }
            }
        }
    }

    SuiteReport {
        schema_version: REPORT_SCHEMA_VERSION,
        tool: ToolInfo {
            name: "hdlreg".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        invocation,
        summary,
        cases,
    }
}

pub fn compute_exit_code(report: &SuiteReport) -> u8 {
    if report.summary.aborted.is_some() {
        return EXIT_ABORTED;
    }
    if report.summary.failed > 0 {
        return EXIT_FAILURES;
    }
    EXIT_PASS
}

/// Human-readable report: one `status<TAB>scenario/id` line per case, a block per
/// failure, and a `summary:` line.
pub fn render_text(report: &SuiteReport, exit_code: u8) -> String {
    let mut out = String::new();
    for c in &report.cases {
        out.push_str(&format!("{}\t{}\n", c.verdict.status(), c.display_name()));
    }

    for c in &report.cases {
        let Verdict::Fail(reason) = &c.verdict else {
            continue;
        };
        out.push('\n');
        out.push_str(&format!("=== {} ({})\n", c.display_name(), reason.kind.as_str()));
        if let Some(step) = &reason.step {
            out.push_str(&format!("step: {step}\n"));
        }
        if let Some(cmd) = &reason.command {
            out.push_str(&format!("command: {cmd}\n"));
        }
        if let Some(code) = reason.exit_code {
            out.push_str(&format!("exit code: {code}\n"));
        }
        if let Some(dir) = c.obj_dir.as_deref().filter(|_| c.obj_dir_kept) {
            out.push_str(&format!("obj_dir: {dir}\n"));
        }
        for line in reason.detail.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }

    let s = &report.summary;
    out.push_str(&format!(
        "summary: passed={} failed={} skipped={} (exit={})",
        s.passed, s.failed, s.skipped, exit_code
    ));
    if let Some(why) = &s.aborted {
        out.push_str(&format!(" aborted: {why}"));
    }
    out.push('\n');
    out
}

pub fn write_report(path: &Path, report: &SuiteReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)? + "\n";
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir: {}", parent.display()))?;
    }
    std::fs::write(path, json.as_bytes())
        .with_context(|| format!("write report: {}", path.display()))
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
