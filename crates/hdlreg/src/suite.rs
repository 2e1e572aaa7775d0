//! Suite discovery, planning, and the worker pool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use hdlreg_runner::{CancelToken, CleanupPolicy, ObjDir, DEFAULT_MAX_OUTPUT_BYTES};
use hdlreg_scenarios::{ScenarioCaps, ScenarioTag};

use crate::case::{case_id, load_case, TestCase};
use crate::dispatch::Dispatcher;
use crate::error::ErrorKind;
use crate::pipeline::{run_case, CasePlan, RunContext};
use crate::report::{CaseReport, FailReason, Verdict};

pub const DEFAULT_PATTERN: &str = "**/t_*.json";
pub const DEFAULT_CASE_TIMEOUT: Duration = Duration::from_secs(300);
const ABORTED_SKIP_PREFIX: &str = "suite aborted";

/// Every knob a suite run takes. The CLI maps its flags onto this one-to-one.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub suite_dir: PathBuf,
    pub pattern: String,
    /// Substring a case id must contain.
    pub filter: Option<String>,
    /// Concrete run scenarios; empty means `vlt`.
    pub scenarios: Vec<ScenarioTag>,
    pub jobs: usize,
    pub obj_root: PathBuf,
    pub toolchain_root: Option<PathBuf>,
    pub backend: Option<PathBuf>,
    pub case_timeout: Duration,
    pub suite_timeout: Option<Duration>,
    pub max_output_bytes: usize,
    pub cleanup: CleanupPolicy,
}

impl SuiteConfig {
    pub fn new(suite_dir: impl Into<PathBuf>) -> Self {
        Self {
            suite_dir: suite_dir.into(),
            pattern: DEFAULT_PATTERN.to_string(),
            filter: None,
            scenarios: Vec::new(),
            jobs: 1,
            obj_root: PathBuf::from("obj_dir"),
            toolchain_root: None,
            backend: None,
            case_timeout: DEFAULT_CASE_TIMEOUT,
            suite_timeout: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            cleanup: CleanupPolicy::default(),
        }
    }

    pub fn run_scenarios(&self) -> Vec<ScenarioTag> {
        if self.scenarios.is_empty() {
            vec![ScenarioTag::Vlt]
        } else {
            self.scenarios.clone()
        }
    }

    /// Cancellation token for one run, bound to the suite deadline if one is set.
    pub fn cancel_token(&self) -> CancelToken {
        match self.suite_timeout {
            Some(t) => CancelToken::with_deadline(Instant::now() + t),
            None => CancelToken::new(),
        }
    }
}

/// One case under one run scenario, ready to run.
#[derive(Debug, Clone)]
pub struct Job {
    pub case: usize,
    pub scenario: ScenarioTag,
    pub declared: ScenarioTag,
    pub caps: ScenarioCaps,
    pub obj_dir: PathBuf,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub cases: Vec<TestCase>,
    pub jobs: Vec<Job>,
    /// Cases that failed to load; they fail without running.
    pub rejected: Vec<CaseReport>,
}

/// Case files under `cfg.suite_dir` matching the glob and filter, sorted and absolute.
pub fn discover(cfg: &SuiteConfig) -> Result<Vec<PathBuf>> {
    let matcher: GlobMatcher = Glob::new(&cfg.pattern)
        .with_context(|| format!("invalid --pattern: {}", cfg.pattern))?
        .compile_matcher();

    let root = absolutize(&cfg.suite_dir)?;
    if !root.is_dir() {
        anyhow::bail!("suite dir is not a directory: {}", root.display());
    }

    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(&root).follow_links(true) {
        let entry = entry.with_context(|| format!("walk suite dir: {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        if !matcher.is_match(rel) {
            continue;
        }
        if let Some(filter) = &cfg.filter {
            if !case_id(&root, entry.path()).contains(filter.as_str()) {
                continue;
            }
        }
        out.push(entry.into_path());
    }
    out.sort();
    tracing::debug!(count = out.len(), suite_dir = %root.display(), "discovered cases");
    Ok(out)
}

/// Load every discovered case and expand it into (case, run scenario) jobs.
pub fn plan(cfg: &SuiteConfig) -> Result<Plan> {
    let runs = cfg.run_scenarios();
    for s in &runs {
        if !s.is_concrete() {
            anyhow::bail!("--scenario {s} is a group; pick one of dist, vlt, vltmt");
        }
    }

    let root = absolutize(&cfg.suite_dir)?;
    let mut plan = Plan::default();
    let mut obj_dirs: BTreeMap<PathBuf, String> = BTreeMap::new();

    for path in discover(cfg)? {
        let case = match load_case(&root, &path) {
            Ok(case) => case,
            Err(err) => {
                tracing::warn!(case = %path.display(), error = %err, "case rejected");
                plan.rejected.push(CaseReport::without_run(
                    case_id(&root, &path),
                    None,
                    &path,
                    Verdict::Fail(FailReason::from_error(&err, &[])),
                ));
                continue;
            }
        };

        let idx = plan.cases.len();
        for &scenario in &runs {
            let Some((declared, caps)) = case.declared_for(scenario) else {
                tracing::debug!(case = %case.id, %scenario, "scenario not declared, not run");
                continue;
            };
            let obj_dir = cfg
                .obj_root
                .join(format!("obj_{}", scenario.as_str()))
                .join(&case.id);
            if let Some(prev) = obj_dirs.insert(obj_dir.clone(), case.id.clone()) {
                anyhow::bail!(
                    "cases {prev} and {} would share obj_dir {}",
                    case.id,
                    obj_dir.display()
                );
            }
            plan.jobs.push(Job {
                case: idx,
                scenario,
                declared,
                caps,
                obj_dir,
            });
        }
        plan.cases.push(case);
    }
    Ok(plan)
}

/// What a finished run hands to the reporter.
#[derive(Debug)]
pub struct SuiteOutcome {
    pub cases: Vec<CaseReport>,
    /// Set when a signal or the suite deadline cut the run short.
    pub aborted: Option<String>,
    pub elapsed: Duration,
}

/// Run `plan` on `cfg.jobs` workers.
///
/// Case failures are reported; only harness faults (obj_dir cannot be created, step
/// log cannot be written, ...) return `Err`, after which no new case starts.
pub fn run_suite(cfg: &SuiteConfig, plan: Plan, cancel: &CancelToken) -> Result<SuiteOutcome> {
    let start = Instant::now();
    let dispatcher = Dispatcher::from_env(cfg.toolchain_root.clone(), cfg.backend.clone());
    let ctx = RunContext {
        dispatcher: &dispatcher,
        cancel,
        default_timeout: cfg.case_timeout,
        max_output_bytes: cfg.max_output_bytes,
    };

    let Plan {
        cases,
        jobs,
        rejected,
    } = plan;

    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<CaseReport>> = Mutex::new(rejected);
    let first_err: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    std::thread::scope(|scope| {
        let workers = cfg.jobs.max(1).min(jobs.len().max(1));
        for _ in 0..workers {
            scope.spawn(|| loop {
                if let Ok(guard) = first_err.lock() {
                    if guard.is_some() {
                        return;
                    }
                }
                let idx = next.fetch_add(1, Ordering::Relaxed);
                if idx >= jobs.len() {
                    return;
                }
                let job = &jobs[idx];
                let case = &cases[job.case];

                let report = match cancel.reason() {
                    Some(reason) => Ok(CaseReport::without_run(
                        &case.id,
                        Some(job.scenario),
                        &case.path,
                        Verdict::skip(format!("{ABORTED_SKIP_PREFIX}: {}", reason.as_str())),
                    )),
                    None => run_job(&ctx, cfg.cleanup, case, job),
                };
                match report {
                    Ok(r) => {
                        if let Ok(mut guard) = results.lock() {
                            guard.push(r);
                        }
                    }
                    Err(err) => {
                        // Kill whatever the other workers are running.
                        cancel.cancel();
                        if let Ok(mut guard) = first_err.lock() {
                            if guard.is_none() {
                                *guard = Some(err);
                            }
                        }
                        return;
                    }
                }
            });
        }
    });

    if let Some(err) = first_err.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(err);
    }
    let mut out = results.into_inner().unwrap_or_else(|e| e.into_inner());
    out.sort_by(|a, b| a.id.cmp(&b.id).then(a.scenario.cmp(&b.scenario)));

    // A deadline that passes after the last case finished aborted nothing.
    let cut_short = out.iter().any(|c| match &c.verdict {
        Verdict::Fail(reason) => reason.kind == ErrorKind::Cancelled,
        Verdict::Skip { reason } => reason.starts_with(ABORTED_SKIP_PREFIX),
        Verdict::Pass => false,
    });
    let aborted = cancel
        .reason()
        .filter(|_| cut_short)
        .map(|r| r.as_str().to_string());
    if let Some(why) = &aborted {
        tracing::warn!(reason = %why, "suite aborted");
    }
    Ok(SuiteOutcome {
        cases: out,
        aborted,
        elapsed: start.elapsed(),
    })
}

fn run_job(
    ctx: &RunContext<'_>,
    cleanup: CleanupPolicy,
    case: &TestCase,
    job: &Job,
) -> Result<CaseReport> {
    if let Some(reason) = &case.skip {
        return Ok(CaseReport::without_run(
            &case.id,
            Some(job.scenario),
            &case.path,
            Verdict::skip(reason.clone()),
        ));
    }

    let obj_dir = ObjDir::create_fresh(&job.obj_dir)?;
    let plan = CasePlan {
        case,
        scenario: job.scenario,
        caps: job.caps,
        obj_dir: obj_dir.path(),
    };
    let run = run_case(ctx, &plan)?;
    let path = obj_dir.path().to_path_buf();
    let kept = obj_dir.finish(cleanup, run.verdict.is_pass())?;

    Ok(CaseReport::from_run(
        &case.id,
        job.scenario,
        job.declared,
        &case.path,
        &path,
        kept,
        run,
    ))
}

/// `scenario/id` for every planned job, for `--list`.
pub fn list_jobs(plan: &Plan) -> Vec<String> {
    plan.jobs
        .iter()
        .map(|j| format!("{}/{}", j.scenario, plan.cases[j.case].id))
        .collect()
}

/// Absolute form of `path` relative to the current directory, without touching the
/// filesystem.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("get current directory")?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_case(root: &Path, rel: &str, scenarios: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(
            &path,
            format!(
                r#"{{"schema_version":"hdlreg.case@0.1.0","scenarios":{scenarios},"steps":[{{"passes":{{}}}}]}}"#
            ),
        )
        .expect("write case");
    }

    #[test]
    fn discover_honors_pattern_and_filter() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_case(tmp.path(), "t/t_alpha.json", r#"["vlt"]"#);
        write_case(tmp.path(), "t/t_beta.json", r#"["vlt"]"#);
        write_case(tmp.path(), "t/helper.json", r#"["vlt"]"#);

        let mut cfg = SuiteConfig::new(tmp.path());
        let ids: Vec<String> = discover(&cfg)
            .expect("discover")
            .iter()
            .map(|p| case_id(tmp.path(), p))
            .collect();
        assert_eq!(ids, vec!["t/t_alpha", "t/t_beta"]);

        cfg.filter = Some("beta".to_string());
        assert_eq!(discover(&cfg).expect("discover").len(), 1);
    }

    #[test]
    fn plan_expands_groups_and_keeps_obj_dirs_distinct() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_case(tmp.path(), "t_sim.json", r#"["simulator"]"#);
        write_case(tmp.path(), "t_st.json", r#"["simulator_st"]"#);
        write_case(tmp.path(), "t_dist.json", r#"["dist"]"#);
        write_case(tmp.path(), "t_bad.json", r#"["xsim"]"#);

        let mut cfg = SuiteConfig::new(tmp.path());
        cfg.obj_root = tmp.path().join("out");
        cfg.scenarios = vec![ScenarioTag::Vlt, ScenarioTag::Vltmt];
        let plan = plan(&cfg).expect("plan");

        assert_eq!(
            list_jobs(&plan),
            vec!["vlt/t_sim", "vltmt/t_sim", "vlt/t_st"]
        );
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].id, "t_bad");
        assert_eq!(
            plan.jobs[1].obj_dir,
            tmp.path().join("out").join("obj_vltmt").join("t_sim")
        );
    }

    #[test]
    fn group_run_scenario_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cfg = SuiteConfig::new(tmp.path());
        cfg.scenarios = vec![ScenarioTag::Simulator];
        assert!(plan(&cfg).is_err());
    }

    #[test]
    fn cancelled_suite_skips_unstarted_jobs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_case(tmp.path(), "t_a.json", r#"["vlt"]"#);
        write_case(tmp.path(), "t_b.json", r#"["vlt"]"#);
        let mut cfg = SuiteConfig::new(tmp.path());
        cfg.obj_root = tmp.path().join("out");

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = run_suite(&cfg, plan(&cfg).expect("plan"), &cancel).expect("run");
        assert_eq!(outcome.cases.len(), 2);
        for c in &outcome.cases {
            assert_eq!(c.verdict.status(), "skip");
        }
        assert_eq!(outcome.aborted.as_deref(), Some("cancel requested"));
        assert!(!tmp.path().join("out").exists());
    }
}
