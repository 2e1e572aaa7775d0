//! Per-case step pipeline.
//!
//! Steps run strictly in declaration order inside the case's obj_dir. The first step
//! whose outcome differs from its expectation fails the case and nothing after it
//! runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use hdlreg_compare::{compare_files, compare_output_to_golden, ComparisonKind, ComparisonResult};
use hdlreg_contracts::{ALL_FINISHED_MARKER, TOOLCHAIN_ROOT_ENV};
use hdlreg_runner::{is_launch_failure, run_process, CancelToken, ProcessOutput, ProcessSpec};
use hdlreg_scenarios::{ScenarioCaps, ScenarioTag};
use serde::Serialize;

use crate::case::{
    BuildStep, CompareStep, ExecuteStep, Expectation, Placeholders, RunStep, Step, TestCase,
};
use crate::dispatch::{artifact_path, Dispatcher};
use crate::error::HarnessError;
use crate::report::{FailReason, Verdict};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Compile,
    Lint,
    Execute,
    Run,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Compile => "compile",
            StepKind::Lint => "lint",
            StepKind::Execute => "execute",
            StepKind::Run => "run",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    ExpectedFailure,
    UnexpectedFailure,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Pending,
    Compiling,
    Linting,
    Executing,
    Running,
    Comparing,
    Pass,
    Fail,
}

impl CaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaseState::Pass | CaseState::Fail)
    }
}

/// Golden check of a step's captured stream.
#[derive(Debug, Clone, Serialize)]
pub struct ExpectCheck {
    pub stream: &'static str,
    pub golden: PathBuf,
    pub result: ComparisonResult,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub label: String,
    pub kind: StepKind,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub command_line: String,
    pub outcome: StepOutcome,
    pub exit_status: i32,
    pub exit_signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
    pub timeout: Duration,
    pub log_path: Option<PathBuf>,
    pub expect_check: Option<ExpectCheck>,
}

impl StepResult {
    /// Exit code worth reporting; `None` when the harness killed the child.
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            StepOutcome::Timeout | StepOutcome::Cancelled => None,
            _ => Some(self.exit_status),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRecord {
    pub label: String,
    pub kind: ComparisonKind,
    pub actual: PathBuf,
    pub golden: PathBuf,
    pub result: ComparisonResult,
}

/// Everything one case run produced.
#[derive(Debug, Clone)]
pub struct CaseRun {
    pub state: CaseState,
    pub steps: Vec<StepResult>,
    pub comparisons: Vec<ComparisonRecord>,
    pub verdict: Verdict,
    pub duration: Duration,
}

impl CaseRun {
    fn new() -> Self {
        Self {
            state: CaseState::Pending,
            steps: Vec::new(),
            comparisons: Vec::new(),
            verdict: Verdict::Pass,
            duration: Duration::ZERO,
        }
    }

    fn advance(&mut self, next: CaseState) -> Result<(), HarnessError> {
        if self.state.is_terminal() {
            return Err(HarnessError::Internal(anyhow::anyhow!(
                "case state {:?} is terminal, cannot enter {next:?}",
                self.state
            )));
        }
        tracing::trace!(from = ?self.state, to = ?next, "case state");
        self.state = next;
        Ok(())
    }
}

/// Suite-wide knobs every case run sees.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub dispatcher: &'a Dispatcher,
    pub cancel: &'a CancelToken,
    pub default_timeout: Duration,
    pub max_output_bytes: usize,
}

/// One case under one run scenario.
#[derive(Debug, Clone, Copy)]
pub struct CasePlan<'a> {
    pub case: &'a TestCase,
    pub scenario: ScenarioTag,
    pub caps: ScenarioCaps,
    pub obj_dir: &'a Path,
}

impl CasePlan<'_> {
    fn timeout(&self, ctx: &RunContext<'_>) -> Duration {
        self.case.timeout.unwrap_or(ctx.default_timeout)
    }
}

/// Run every step of `plan.case`.
///
/// Case-local failures end up in the returned verdict; `Err` is reserved for harness
/// faults that should abort the suite.
pub fn run_case(ctx: &RunContext<'_>, plan: &CasePlan<'_>) -> anyhow::Result<CaseRun> {
    let start = Instant::now();
    let ph = plan
        .case
        .placeholders(plan.obj_dir, ctx.dispatcher.toolchain_root());
    let mut run = CaseRun::new();

    tracing::info!(case = %plan.case.id, scenario = %plan.scenario, "case start");
    let driven = drive(ctx, plan, &ph, &mut run);
    run.duration = start.elapsed();

    match driven {
        Ok(()) => {
            if !run.state.is_terminal() {
                run.state = CaseState::Pass;
            }
            run.verdict = Verdict::Pass;
        }
        Err(HarnessError::Internal(err)) => {
            return Err(err.context(format!("case {} ({})", plan.case.id, plan.scenario)));
        }
        Err(err) => {
            run.state = CaseState::Fail;
            tracing::info!(case = %plan.case.id, scenario = %plan.scenario, error = %err, "case failed");
            run.verdict = Verdict::Fail(FailReason::from_error(&err, &run.steps));
        }
    }
    tracing::info!(
        case = %plan.case.id,
        scenario = %plan.scenario,
        status = run.verdict.status(),
        duration_ms = run.duration.as_millis() as u64,
        "case done"
    );
    Ok(run)
}

fn drive(
    ctx: &RunContext<'_>,
    plan: &CasePlan<'_>,
    ph: &Placeholders,
    run: &mut CaseRun,
) -> Result<(), HarnessError> {
    let mut labels = Labels::default();
    let mut compiled: Option<(String, StepOutcome)> = None;

    for step in &plan.case.steps {
        let label = labels.next(step.name());
        if let Some(reason) = ctx.cancel.reason() {
            return Err(HarnessError::Cancelled {
                step: label,
                reason: reason.as_str().to_string(),
            });
        }

        match step {
            Step::Compile(build) => {
                run.advance(CaseState::Compiling)?;
                let mut result = launch_build(ctx, plan, ph, StepKind::Compile, build, &label)?;
                compiled = Some((label, result.outcome));
                let checked = check_step(&mut result, &build.expect, ph);
                run.steps.push(result);
                checked?;
            }
            Step::Lint(build) => {
                run.advance(CaseState::Linting)?;
                let mut result = launch_build(ctx, plan, ph, StepKind::Lint, build, &label)?;
                let checked = check_step(&mut result, &build.expect, ph);
                run.steps.push(result);
                checked?;
            }
            Step::Execute(exec) => {
                run.advance(CaseState::Executing)?;
                check_preceding_compile(&label, compiled.as_ref())?;
                let mut result = launch_execute(ctx, plan, ph, exec, &label)?;
                let checked = check_step(&mut result, &exec.expect, ph)
                    .and_then(|()| check_finished(&result, exec));
                run.steps.push(result);
                checked?;
            }
            Step::Run(cmd) => {
                run.advance(CaseState::Running)?;
                let mut result = launch_run(ctx, plan, ph, cmd, &label)?;
                let checked = check_step(&mut result, &cmd.expect, ph);
                run.steps.push(result);
                checked?;
            }
            Step::Compare(cmp) => {
                run.advance(CaseState::Comparing)?;
                let record = compare(plan, ph, cmp, &label)?;
                let result = record.result.clone();
                run.comparisons.push(record);
                comparison_error(&label, &result)?;
            }
            Step::Passes => {
                run.advance(CaseState::Pass)?;
            }
        }
    }
    Ok(())
}

/// Step labels: the step name, suffixed `_2`, `_3`, ... when a name repeats.
#[derive(Default)]
struct Labels(BTreeMap<&'static str, usize>);

impl Labels {
    fn next(&mut self, name: &'static str) -> String {
        let n = self.0.entry(name).or_insert(0);
        *n += 1;
        if *n == 1 {
            name.to_string()
        } else {
            format!("{name}_{n}")
        }
    }
}

/// Command line for compile/lint: scenario defaults, `flags`, `backend_flags`,
/// `defines`, `main_file`, then the top file. Entries are split on whitespace and
/// appended as-is; duplicates are passed through.
pub fn build_args(
    defaults: Vec<String>,
    step: &BuildStep,
    ph: &Placeholders,
) -> Result<Vec<String>, HarnessError> {
    let mut args = defaults;
    for entry in step.flags.iter().chain(step.backend_flags.iter()) {
        for tok in entry.split_ascii_whitespace() {
            args.push(ph.expand(tok)?);
        }
    }
    for (name, value) in &step.defines {
        if value.is_empty() {
            args.push(format!("+define+{name}"));
        } else {
            args.push(format!("+define+{name}={}", ph.expand(value)?));
        }
    }
    if let Some(main) = &step.main_file {
        args.push(ph.expand_path(main)?.display().to_string());
    }
    args.push(ph.top.display().to_string());
    Ok(args)
}

fn launch_build(
    ctx: &RunContext<'_>,
    plan: &CasePlan<'_>,
    ph: &Placeholders,
    kind: StepKind,
    step: &BuildStep,
    label: &str,
) -> Result<StepResult, HarnessError> {
    if !plan.caps.compiles {
        return Err(HarnessError::config(format!(
            "{label}: scenario {} has no compiler backend",
            plan.scenario
        )));
    }
    let backend = ctx.dispatcher.resolve(plan.scenario)?;
    let defaults = match kind {
        StepKind::Lint => backend.lint_defaults(ph)?,
        _ => backend.compile_defaults(ph)?,
    };

    let mut spec = ProcessSpec::new(&backend.executable, plan.obj_dir);
    spec.args = build_args(defaults, step, ph)?;
    if let Some(root) = ctx.dispatcher.toolchain_root() {
        spec.env
            .insert(TOOLCHAIN_ROOT_ENV.to_string(), root.display().to_string());
    }
    launch(ctx, plan, kind, label, spec, step.expect.fails)
}

/// Execute only runs on top of a compile that succeeded as expected.
pub fn check_preceding_compile(
    label: &str,
    compiled: Option<&(String, StepOutcome)>,
) -> Result<(), HarnessError> {
    match compiled {
        Some((_, StepOutcome::Success)) => Ok(()),
        Some((compile_label, _)) => Err(HarnessError::PrecedingStepFailed {
            step: label.to_string(),
            preceding: compile_label.clone(),
        }),
        None => Err(HarnessError::PrecedingStepFailed {
            step: label.to_string(),
            preceding: "compile".to_string(),
        }),
    }
}

fn launch_execute(
    ctx: &RunContext<'_>,
    plan: &CasePlan<'_>,
    ph: &Placeholders,
    step: &ExecuteStep,
    label: &str,
) -> Result<StepResult, HarnessError> {
    if !plan.caps.executes {
        return Err(HarnessError::config(format!(
            "{label}: scenario {} cannot execute",
            plan.scenario
        )));
    }
    let mut spec = ProcessSpec::new(artifact_path(ph)?, plan.obj_dir);
    for entry in &step.args {
        for tok in entry.split_ascii_whitespace() {
            spec.args.push(ph.expand(tok)?);
        }
    }
    launch(ctx, plan, StepKind::Execute, label, spec, step.expect.fails)
}

fn launch_run(
    ctx: &RunContext<'_>,
    plan: &CasePlan<'_>,
    ph: &Placeholders,
    step: &RunStep,
    label: &str,
) -> Result<StepResult, HarnessError> {
    let Some((program, rest)) = step.cmd.split_first() else {
        return Err(HarnessError::config(format!("{label}: cmd is empty")));
    };
    let program = ph.expand(program)?;
    let program = if program.contains('/') {
        hdlreg_runner::resolve_against(&ph.case_dir, Path::new(&program))
    } else {
        PathBuf::from(program)
    };

    let mut spec = ProcessSpec::new(program, plan.obj_dir);
    for arg in rest {
        spec.args.push(ph.expand(arg)?);
    }
    if step.toolchain_run {
        let root = ctx
            .dispatcher
            .require_toolchain_root(&format!("{label} sets verilator_run"))?;
        spec.env
            .insert(TOOLCHAIN_ROOT_ENV.to_string(), root.display().to_string());
    }
    launch(ctx, plan, StepKind::Run, label, spec, step.expect.fails)
}

fn launch(
    ctx: &RunContext<'_>,
    plan: &CasePlan<'_>,
    kind: StepKind,
    label: &str,
    mut spec: ProcessSpec,
    fails: bool,
) -> Result<StepResult, HarnessError> {
    spec.timeout = plan.timeout(ctx);
    spec.max_output_bytes = ctx.max_output_bytes;

    let output = match run_process(&spec, ctx.cancel) {
        Ok(out) => out,
        Err(err) if is_launch_failure(&err) => {
            return Err(HarnessError::config(format!(
                "{label}: cannot launch {}: {err:#}",
                spec.program.display()
            )))
        }
        Err(err) => {
            return Err(HarnessError::Internal(
                err.context(format!("{label}: run {}", spec.program.display())),
            ))
        }
    };

    let outcome = derive_outcome(&output, fails);
    let log_path = plan
        .obj_dir
        .join(format!("{}_{label}.log", plan.scenario.as_str()));
    write_step_log(&log_path, &spec, &output)?;

    tracing::debug!(
        case = %plan.case.id,
        step = label,
        outcome = ?outcome,
        exit_status = output.exit_status,
        "step finished"
    );

    Ok(StepResult {
        label: label.to_string(),
        kind,
        argv: spec.argv(),
        cwd: spec.cwd.clone(),
        command_line: spec.command_line(),
        outcome,
        exit_status: output.exit_status,
        exit_signal: output.exit_signal,
        stdout: output.stdout,
        stderr: output.stderr,
        stdout_truncated: output.stdout_truncated,
        stderr_truncated: output.stderr_truncated,
        duration: output.duration,
        timeout: spec.timeout,
        log_path: Some(log_path),
        expect_check: None,
    })
}

pub fn derive_outcome(output: &ProcessOutput, fails: bool) -> StepOutcome {
    if output.timed_out {
        return StepOutcome::Timeout;
    }
    if output.cancelled {
        return StepOutcome::Cancelled;
    }
    match (output.exit_status == 0, fails) {
        (true, false) => StepOutcome::Success,
        (false, true) => StepOutcome::ExpectedFailure,
        (true, true) | (false, false) => StepOutcome::UnexpectedFailure,
    }
}

/// Turn a step outcome into pass/fail, checking `expect_filename` when the outcome
/// was the expected one.
pub fn check_step(
    result: &mut StepResult,
    expect: &Expectation,
    ph: &Placeholders,
) -> Result<(), HarnessError> {
    match result.outcome {
        StepOutcome::Timeout => {
            return Err(HarnessError::Timeout {
                step: result.label.clone(),
                timeout: result.timeout,
            })
        }
        StepOutcome::Cancelled => {
            return Err(HarnessError::Cancelled {
                step: result.label.clone(),
                reason: "killed by suite abort".to_string(),
            })
        }
        StepOutcome::UnexpectedFailure => {
            return Err(HarnessError::UnexpectedFailure {
                step: result.label.clone(),
                detail: describe_unexpected(result, expect.fails),
            })
        }
        StepOutcome::Success | StepOutcome::ExpectedFailure => {}
    }

    let Some(golden) = &expect.expect_filename else {
        return Ok(());
    };
    let golden = ph.expand_path(golden)?;
    let (stream, bytes, truncated) = match result.kind {
        StepKind::Compile | StepKind::Lint => ("stderr", &result.stderr, result.stderr_truncated),
        StepKind::Execute | StepKind::Run => ("stdout", &result.stdout, result.stdout_truncated),
    };
    let cmp = if truncated {
        ComparisonResult::Mismatch {
            summary: format!(
                "{stream} was truncated at the {} byte capture cap; it cannot match a golden file",
                bytes.len()
            ),
        }
    } else {
        compare_output_to_golden(bytes, &golden, &expect.normalize.for_run(ph))?
    };
    result.expect_check = Some(ExpectCheck {
        stream,
        golden,
        result: cmp.clone(),
    });
    comparison_error(&result.label, &cmp)
}

fn check_finished(result: &StepResult, step: &ExecuteStep) -> Result<(), HarnessError> {
    if !step.check_finished || result.outcome != StepOutcome::Success {
        return Ok(());
    }
    let stdout = String::from_utf8_lossy(&result.stdout);
    if stdout.contains(ALL_FINISHED_MARKER) {
        return Ok(());
    }
    Err(HarnessError::UnexpectedFailure {
        step: result.label.clone(),
        detail: format!("exited 0 but stdout lacks {ALL_FINISHED_MARKER:?}"),
    })
}

fn describe_unexpected(result: &StepResult, fails: bool) -> String {
    if fails && result.exit_status == 0 {
        return "expected failure, exited 0".to_string();
    }
    let mut out = match result.exit_signal {
        Some(sig) => format!("killed by signal {sig}"),
        None => format!("exit status {}", result.exit_status),
    };
    let stderr = String::from_utf8_lossy(&result.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    if !lines.is_empty() {
        let from = lines.len().saturating_sub(STDERR_TAIL_LINES);
        out.push_str("; stderr tail:");
        for line in &lines[from..] {
            out.push_str("\n  ");
            out.push_str(line);
        }
    }
    out
}

fn compare(
    plan: &CasePlan<'_>,
    ph: &Placeholders,
    step: &CompareStep,
    label: &str,
) -> Result<ComparisonRecord, HarnessError> {
    let supported = match step.kind {
        ComparisonKind::Text => true,
        ComparisonKind::Trace => plan.caps.traces,
        ComparisonKind::AnnotatedCoverage => plan.caps.coverage,
    };
    if !supported {
        return Err(HarnessError::config(format!(
            "{label}: scenario {} produces no artifacts for {}",
            plan.scenario,
            step.kind.as_str()
        )));
    }

    let actual = ph.expand_path(&step.actual)?;
    let golden = ph.expand_path(&step.golden)?;
    let result = compare_files(step.kind, &actual, &golden, &step.normalize.for_run(ph))?;
    Ok(ComparisonRecord {
        label: label.to_string(),
        kind: step.kind,
        actual,
        golden,
        result,
    })
}

/// Missing golden is a case configuration problem; everything else non-identical is a
/// mismatch.
fn comparison_error(label: &str, result: &ComparisonResult) -> Result<(), HarnessError> {
    match result {
        ComparisonResult::Identical => Ok(()),
        ComparisonResult::MissingGolden { .. } => Err(HarnessError::config(format!(
            "{label}: {}",
            result.describe()
        ))),
        ComparisonResult::Mismatch { .. } | ComparisonResult::MissingActual { .. } => {
            Err(HarnessError::ComparisonMismatch {
                label: label.to_string(),
                detail: result.describe(),
            })
        }
    }
}

fn write_step_log(path: &Path, spec: &ProcessSpec, out: &ProcessOutput) -> anyhow::Result<()> {
    let mut log = Vec::with_capacity(out.stdout.len() + out.stderr.len() + 256);
    log.extend_from_slice(format!("$ {}\n", spec.command_line()).as_bytes());
    let ended = if out.timed_out {
        " (timed out)"
    } else if out.cancelled {
        " (cancelled)"
    } else {
        ""
    };
    log.extend_from_slice(
        format!(
            "exit: {}{ended} in {} ms\n",
            out.exit_status,
            out.duration.as_millis()
        )
        .as_bytes(),
    );
    for (name, bytes, truncated) in [
        ("stdout", &out.stdout, out.stdout_truncated),
        ("stderr", &out.stderr, out.stderr_truncated),
    ] {
        let note = if truncated { " (truncated)" } else { "" };
        log.extend_from_slice(format!("--- {name}{note}\n").as_bytes());
        log.extend_from_slice(bytes);
        if !bytes.is_empty() && !bytes.ends_with(b"\n") {
            log.push(b'\n');
        }
    }
    std::fs::write(path, log).with_context(|| format!("write step log: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn ph() -> Placeholders {
        Placeholders {
            obj_dir: PathBuf::from("/w/obj_vlt/t_a"),
            case_dir: PathBuf::from("/suite/t"),
            name: "t_a".to_string(),
            top: PathBuf::from("/suite/t/t_a.v"),
            golden: PathBuf::from("/suite/t/t_a.out"),
            toolchain_root: Some(PathBuf::from("/opt/verilator")),
        }
    }

    fn output(exit_status: i32) -> ProcessOutput {
        ProcessOutput {
            exit_status,
            exit_signal: None,
            timed_out: false,
            cancelled: false,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_millis(3),
        }
    }

    fn step_result(kind: StepKind, outcome: StepOutcome, exit_status: i32) -> StepResult {
        StepResult {
            label: kind.as_str().to_string(),
            kind,
            argv: vec!["verilator".to_string()],
            cwd: PathBuf::from("/w/obj_vlt/t_a"),
            command_line: "cd /w/obj_vlt/t_a && verilator".to_string(),
            outcome,
            exit_status,
            exit_signal: None,
            stdout: Vec::new(),
            stderr: b"%Error: t_a.v:3: syntax error\n".to_vec(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_millis(3),
            timeout: Duration::from_secs(300),
            log_path: None,
            expect_check: None,
        }
    }

    #[test]
    fn flag_groups_append_in_declaration_order_without_dedup() {
        let mut defines = BTreeMap::new();
        defines.insert("WIDTH".to_string(), "8".to_string());
        defines.insert("DEBUG".to_string(), String::new());
        let step = BuildStep {
            flags: vec!["-Wall --x-assign 0".to_string()],
            backend_flags: vec!["--x-assign unique".to_string(), "-Wall".to_string()],
            defines,
            main_file: Some("t_a_main.cpp".to_string()),
            expect: Expectation::default(),
        };
        let args = build_args(vec!["--cc".to_string()], &step, &ph()).expect("args");
        assert_eq!(
            args,
            vec![
                "--cc",
                "-Wall",
                "--x-assign",
                "0",
                "--x-assign",
                "unique",
                "-Wall",
                "+define+DEBUG",
                "+define+WIDTH=8",
                "/suite/t/t_a_main.cpp",
                "/suite/t/t_a.v",
            ]
        );
    }

    #[rstest]
    #[case(0, false, StepOutcome::Success)]
    #[case(1, false, StepOutcome::UnexpectedFailure)]
    #[case(1, true, StepOutcome::ExpectedFailure)]
    #[case(0, true, StepOutcome::UnexpectedFailure)]
    fn outcome_follows_exit_and_expectation(
        #[case] exit: i32,
        #[case] fails: bool,
        #[case] expected: StepOutcome,
    ) {
        assert_eq!(derive_outcome(&output(exit), fails), expected);
    }

    #[test]
    fn timeout_and_cancel_win_over_exit_status() {
        let mut out = output(137);
        out.timed_out = true;
        assert_eq!(derive_outcome(&out, true), StepOutcome::Timeout);
        let mut out = output(137);
        out.cancelled = true;
        assert_eq!(derive_outcome(&out, false), StepOutcome::Cancelled);
    }

    #[test]
    fn expected_failure_that_exits_zero_fails() {
        let mut result = step_result(StepKind::Lint, StepOutcome::UnexpectedFailure, 0);
        let expect = Expectation {
            fails: true,
            ..Expectation::default()
        };
        let err = check_step(&mut result, &expect, &ph()).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::UnexpectedFailure);
        assert_eq!(err.to_string(), "lint: expected failure, exited 0");
    }

    #[test]
    fn unexpected_failure_carries_stderr_tail() {
        let mut result = step_result(StepKind::Compile, StepOutcome::UnexpectedFailure, 1);
        let err = check_step(&mut result, &Expectation::default(), &ph()).expect_err("must fail");
        let detail = err.detail();
        assert!(detail.starts_with("exit status 1; stderr tail:"), "{detail}");
        assert!(detail.contains("syntax error"), "{detail}");
    }

    #[test]
    fn expected_stderr_is_checked_against_golden() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let golden = tmp.path().join("t_a.out");
        std::fs::write(&golden, "%Error: t_a.v:3: syntax error\n").expect("write");
        let expect = Expectation {
            fails: true,
            expect_filename: Some(golden.display().to_string()),
            ..Expectation::default()
        };

        let mut result = step_result(StepKind::Compile, StepOutcome::ExpectedFailure, 1);
        check_step(&mut result, &expect, &ph()).expect("identical");
        assert!(result
            .expect_check
            .as_ref()
            .is_some_and(|c| c.stream == "stderr" && c.result.is_identical()));

        let mut result = step_result(StepKind::Compile, StepOutcome::ExpectedFailure, 1);
        result.stderr = b"%Error: t_a.v:4: other\n".to_vec();
        let err = check_step(&mut result, &expect, &ph()).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::ComparisonMismatch);

        let mut result = step_result(StepKind::Compile, StepOutcome::ExpectedFailure, 1);
        result.stderr_truncated = true;
        let err = check_step(&mut result, &expect, &ph()).expect_err("truncated");
        assert!(err.detail().contains("truncated"), "{err}");
    }

    #[test]
    fn missing_golden_for_expected_output_is_a_configuration_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let expect = Expectation {
            fails: true,
            expect_filename: Some(tmp.path().join("absent.out").display().to_string()),
            ..Expectation::default()
        };
        let mut result = step_result(StepKind::Lint, StepOutcome::ExpectedFailure, 1);
        let err = check_step(&mut result, &expect, &ph()).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[rstest]
    #[case(Some(StepOutcome::UnexpectedFailure))]
    #[case(Some(StepOutcome::ExpectedFailure))]
    #[case(Some(StepOutcome::Timeout))]
    #[case(None)]
    fn execute_needs_a_successful_compile(#[case] compiled: Option<StepOutcome>) {
        let compiled = compiled.map(|o| ("compile".to_string(), o));
        let err = check_preceding_compile("execute", compiled.as_ref()).expect_err("blocked");
        assert_eq!(err.kind(), ErrorKind::PrecedingStepFailed);
        assert_eq!(
            err.to_string(),
            "execute: not attempted because compile did not succeed"
        );
    }

    #[test]
    fn repeated_step_names_get_numbered_labels() {
        let mut labels = Labels::default();
        assert_eq!(labels.next("run"), "run");
        assert_eq!(labels.next("compile"), "compile");
        assert_eq!(labels.next("run"), "run_2");
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut run = CaseRun::new();
        run.advance(CaseState::Compiling).expect("pending -> compiling");
        run.advance(CaseState::Pass).expect("compiling -> pass");
        assert!(run.advance(CaseState::Running).is_err());
    }
}
