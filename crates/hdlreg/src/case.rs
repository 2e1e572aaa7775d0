//! Case files: loading, validation and placeholder expansion.
//!
//! A case is one JSON document (`hdlreg.case@0.1.0`) that declares the scenarios it
//! supports and an ordered list of steps ending in `passes`. Everything is checked
//! when the file is loaded, so a malformed case fails before anything is launched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hdlreg_compare::{ComparisonKind, LineRule, Normalization};
use hdlreg_contracts::{CASE_SCHEMA_VERSION, TOOLCHAIN_ROOT_ENV, TRACE_FILENAME};
use hdlreg_scenarios::{ScenarioCaps, ScenarioTag};
use serde::Deserialize;

use crate::dispatch::parse_tag;
use crate::error::HarnessError;

const PLACEHOLDERS: &[&str] = &[
    "obj_dir",
    "case_dir",
    "name",
    "top",
    "golden",
    "trace",
    "toolchain_root",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseRaw {
    schema_version: String,
    scenarios: Vec<String>,
    #[serde(default)]
    top_filename: Option<String>,
    #[serde(default)]
    golden_filename: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    skip: Option<String>,
    steps: Vec<StepRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum StepRaw {
    Compile(CompileRaw),
    Lint(LintRaw),
    Execute(ExecuteRaw),
    Run(RunRaw),
    FilesIdentical(CompareRaw),
    VcdIdentical(VcdRaw),
    CoverageIdentical(CompareRaw),
    Passes(PassesRaw),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NormalizeRaw {
    #[serde(default)]
    logfile: bool,
    #[serde(default)]
    rules: Vec<RuleRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleRaw {
    pattern: String,
    #[serde(default)]
    replace: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CompileRaw {
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    backend_flags: Vec<String>,
    #[serde(default)]
    defines: BTreeMap<String, String>,
    #[serde(default)]
    main_file: Option<String>,
    #[serde(default)]
    fails: bool,
    #[serde(default)]
    expect_filename: Option<String>,
    #[serde(default)]
    normalize: Option<NormalizeRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LintRaw {
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    backend_flags: Vec<String>,
    #[serde(default)]
    defines: BTreeMap<String, String>,
    #[serde(default)]
    fails: bool,
    #[serde(default)]
    expect_filename: Option<String>,
    #[serde(default)]
    normalize: Option<NormalizeRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecuteRaw {
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    fails: bool,
    #[serde(default)]
    expect_filename: Option<String>,
    #[serde(default)]
    check_finished: bool,
    #[serde(default)]
    normalize: Option<NormalizeRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunRaw {
    cmd: Vec<String>,
    #[serde(default, alias = "verilator_run")]
    toolchain_run: bool,
    #[serde(default)]
    fails: bool,
    #[serde(default)]
    expect_filename: Option<String>,
    #[serde(default)]
    normalize: Option<NormalizeRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CompareRaw {
    actual: String,
    golden: String,
    #[serde(default)]
    normalize: Option<NormalizeRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VcdRaw {
    #[serde(default)]
    actual: Option<String>,
    #[serde(default)]
    golden: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PassesRaw {}

/// Normalization as declared by a case. Path aliases are only known per run, see
/// [`NormalizeSpec::for_run`].
#[derive(Debug, Clone, Default)]
pub struct NormalizeSpec {
    pub logfile: bool,
    pub rules: Vec<LineRule>,
}

impl NormalizeSpec {
    pub fn for_run(&self, ph: &Placeholders) -> Normalization {
        let mut norm = Normalization {
            logfile: self.logfile,
            aliases: Vec::new(),
            rules: self.rules.clone(),
        };
        if self.logfile {
            norm = norm.with_alias(ph.obj_dir.display().to_string(), "<obj_dir>");
            if let Some(root) = &ph.toolchain_root {
                norm = norm.with_alias(root.display().to_string(), "<toolchain_root>");
            }
        }
        norm
    }
}

/// What a launched step is expected to do.
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    pub fails: bool,
    /// Golden for the step's stderr (compile/lint) or stdout (execute/run), checked
    /// whenever the step's outcome matched `fails`.
    pub expect_filename: Option<String>,
    pub normalize: NormalizeSpec,
}

#[derive(Debug, Clone, Default)]
pub struct BuildStep {
    pub flags: Vec<String>,
    pub backend_flags: Vec<String>,
    pub defines: BTreeMap<String, String>,
    pub main_file: Option<String>,
    pub expect: Expectation,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteStep {
    pub args: Vec<String>,
    pub check_finished: bool,
    pub expect: Expectation,
}

#[derive(Debug, Clone, Default)]
pub struct RunStep {
    pub cmd: Vec<String>,
    pub toolchain_run: bool,
    pub expect: Expectation,
}

#[derive(Debug, Clone)]
pub struct CompareStep {
    pub kind: ComparisonKind,
    pub actual: String,
    pub golden: String,
    pub normalize: NormalizeSpec,
}

#[derive(Debug, Clone)]
pub enum Step {
    Compile(BuildStep),
    Lint(BuildStep),
    Execute(ExecuteStep),
    Run(RunStep),
    Compare(CompareStep),
    Passes,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Compile(_) => "compile",
            Step::Lint(_) => "lint",
            Step::Execute(_) => "execute",
            Step::Run(_) => "run",
            Step::Compare(c) => c.kind.as_str(),
            Step::Passes => "passes",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestCase {
    /// Case file path relative to the suite root, without extension.
    pub id: String,
    pub path: PathBuf,
    pub name: String,
    pub case_dir: PathBuf,
    pub scenarios: Vec<ScenarioTag>,
    pub top_filename: String,
    pub golden_filename: String,
    pub timeout: Option<Duration>,
    pub skip: Option<String>,
    pub steps: Vec<Step>,
}

impl TestCase {
    /// First declared tag covering `run`, with the capabilities that apply to the run.
    pub fn declared_for(&self, run: ScenarioTag) -> Option<(ScenarioTag, ScenarioCaps)> {
        self.scenarios
            .iter()
            .find(|t| t.covers(run))
            .map(|&t| (t, t.caps().intersect(run.caps())))
    }

    pub fn top_path(&self) -> PathBuf {
        self.case_dir.join(&self.top_filename)
    }

    pub fn golden_path(&self) -> PathBuf {
        self.case_dir.join(&self.golden_filename)
    }

    pub fn placeholders(&self, obj_dir: &Path, toolchain_root: Option<&Path>) -> Placeholders {
        Placeholders {
            obj_dir: obj_dir.to_path_buf(),
            case_dir: self.case_dir.clone(),
            name: self.name.clone(),
            top: self.top_path(),
            golden: self.golden_path(),
            toolchain_root: toolchain_root.map(Path::to_path_buf),
        }
    }
}

/// Per-run values substituted into `{...}` placeholders.
#[derive(Debug, Clone)]
pub struct Placeholders {
    pub obj_dir: PathBuf,
    pub case_dir: PathBuf,
    pub name: String,
    pub top: PathBuf,
    pub golden: PathBuf,
    pub toolchain_root: Option<PathBuf>,
}

impl Placeholders {
    pub fn trace(&self) -> PathBuf {
        self.obj_dir.join(TRACE_FILENAME)
    }

    pub fn expand(&self, template: &str) -> Result<String, HarnessError> {
        let mut out = String::with_capacity(template.len());
        for piece in scan(template) {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Placeholder(name) => out.push_str(&self.value(name)?),
            }
        }
        Ok(out)
    }

    /// Expand, then resolve relative results against the case directory.
    pub fn expand_path(&self, template: &str) -> Result<PathBuf, HarnessError> {
        let expanded = self.expand(template)?;
        Ok(hdlreg_runner::resolve_against(
            &self.case_dir,
            Path::new(&expanded),
        ))
    }

    fn value(&self, name: &str) -> Result<String, HarnessError> {
        let path = match name {
            "obj_dir" => self.obj_dir.clone(),
            "case_dir" => self.case_dir.clone(),
            "name" => return Ok(self.name.clone()),
            "top" => self.top.clone(),
            "golden" => self.golden.clone(),
            "trace" => self.trace(),
            "toolchain_root" => self.toolchain_root.clone().ok_or_else(|| {
                HarnessError::config(format!(
                    "{{toolchain_root}} used but {TOOLCHAIN_ROOT_ENV} is not set"
                ))
            })?,
            other => {
                return Err(HarnessError::config(format!(
                    "unknown placeholder {{{other}}}"
                )))
            }
        };
        Ok(path.display().to_string())
    }
}

enum Piece<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Split a template into literal runs and `{ident}` placeholders. Braces that do not
/// enclose a lowercase identifier are literal text.
fn scan(template: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let ident_len = after
            .bytes()
            .take_while(|b| b.is_ascii_lowercase() || *b == b'_')
            .count();
        if ident_len > 0 && after.as_bytes().get(ident_len) == Some(&b'}') {
            if open > 0 {
                out.push(Piece::Literal(&rest[..open]));
            }
            out.push(Piece::Placeholder(&after[..ident_len]));
            rest = &after[ident_len + 1..];
        } else {
            out.push(Piece::Literal(&rest[..open + 1]));
            rest = after;
        }
    }
    if !rest.is_empty() {
        out.push(Piece::Literal(rest));
    }
    out
}

fn check_template(template: &str) -> Result<(), String> {
    for piece in scan(template) {
        if let Piece::Placeholder(name) = piece {
            if !PLACEHOLDERS.contains(&name) {
                return Err(format!(
                    "unknown placeholder {{{name}}} in {template:?} (allowed: {})",
                    PLACEHOLDERS.join(", ")
                ));
            }
        }
    }
    Ok(())
}

/// One load problem, addressed by JSON pointer into the case file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDiag {
    pub pointer: String,
    pub message: String,
}

impl std::fmt::Display for CaseDiag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.pointer.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.pointer, self.message)
        }
    }
}

struct Diags(Vec<CaseDiag>);

impl Diags {
    fn push(&mut self, pointer: impl Into<String>, message: impl Into<String>) {
        self.0.push(CaseDiag {
            pointer: pointer.into(),
            message: message.into(),
        });
    }

    fn template(&mut self, pointer: &str, template: &str) {
        if let Err(msg) = check_template(template) {
            self.push(pointer, msg);
        }
    }

    fn templates(&mut self, pointer: &str, templates: &[String]) {
        for (i, t) in templates.iter().enumerate() {
            self.template(&format!("{pointer}/{i}"), t);
        }
    }

    fn defines(&mut self, pointer: &str, defines: &BTreeMap<String, String>) {
        for (name, value) in defines {
            let at = format!("{pointer}/{name}");
            if name.is_empty() || name.contains('=') || name.contains(char::is_whitespace) {
                self.push(&at, format!("invalid define name {name:?}"));
            }
            self.template(&at, value);
        }
    }
}

/// Case id for `path` under `suite_root`: relative path without extension, `/`-separated.
pub fn case_id(suite_root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(suite_root).unwrap_or(path);
    let rel = rel.with_extension("");
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Load and validate one case file.
pub fn load_case(suite_root: &Path, path: &Path) -> Result<TestCase, HarnessError> {
    let bytes = std::fs::read(path)
        .map_err(|err| HarnessError::config(format!("read case {}: {err}", path.display())))?;
    let raw: CaseRaw = serde_json::from_slice(&bytes)
        .map_err(|err| HarnessError::config(format!("parse case {}: {err}", path.display())))?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let case_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    validate(raw, &name).map(|v| TestCase {
        id: case_id(suite_root, path),
        path: path.to_path_buf(),
        name: name.clone(),
        case_dir,
        scenarios: v.scenarios,
        top_filename: v.top_filename,
        golden_filename: v.golden_filename,
        timeout: v.timeout,
        skip: v.skip,
        steps: v.steps,
    })
    .map_err(|diags| {
        let rendered: Vec<String> = diags.iter().map(ToString::to_string).collect();
        HarnessError::config(format!(
            "invalid case {}: {}",
            path.display(),
            rendered.join("; ")
        ))
    })
}

struct Validated {
    scenarios: Vec<ScenarioTag>,
    top_filename: String,
    golden_filename: String,
    timeout: Option<Duration>,
    skip: Option<String>,
    steps: Vec<Step>,
}

fn validate(raw: CaseRaw, name: &str) -> Result<Validated, Vec<CaseDiag>> {
    let mut diags = Diags(Vec::new());

    if raw.schema_version != CASE_SCHEMA_VERSION {
        diags.push(
            "/schema_version",
            format!(
                "schema_version must be {CASE_SCHEMA_VERSION}, got {}",
                raw.schema_version
            ),
        );
    }

    let mut scenarios = Vec::new();
    if raw.scenarios.is_empty() {
        diags.push("/scenarios", "at least one scenario tag is required");
    }
    for (i, tag) in raw.scenarios.iter().enumerate() {
        match parse_tag(tag) {
            Ok(t) if !scenarios.contains(&t) => scenarios.push(t),
            Ok(_) => {}
            Err(err) => diags.push(format!("/scenarios/{i}"), err.to_string()),
        }
    }

    if raw.timeout_secs == Some(0) {
        diags.push("/timeout_secs", "timeout_secs must be > 0");
    }

    let mut steps = Vec::with_capacity(raw.steps.len());
    let mut seen_passes = false;
    let mut seen_compile = false;
    let mut seen_lint = false;
    let mut seen_execute = false;

    for (i, step) in raw.steps.into_iter().enumerate() {
        let base = format!("/steps/{i}");
        if seen_passes {
            diags.push(&base, "no step may follow passes");
        }
        let step = match step {
            StepRaw::Compile(c) => {
                seen_compile = true;
                diags.templates(&format!("{base}/compile/flags"), &c.flags);
                diags.templates(&format!("{base}/compile/backend_flags"), &c.backend_flags);
                diags.defines(&format!("{base}/compile/defines"), &c.defines);
                if let Some(main) = &c.main_file {
                    diags.template(&format!("{base}/compile/main_file"), main);
                }
                Step::Compile(BuildStep {
                    flags: c.flags,
                    backend_flags: c.backend_flags,
                    defines: c.defines,
                    main_file: c.main_file,
                    expect: expectation(
                        &mut diags,
                        &format!("{base}/compile"),
                        c.fails,
                        c.expect_filename,
                        c.normalize,
                    ),
                })
            }
            StepRaw::Lint(l) => {
                seen_lint = true;
                diags.templates(&format!("{base}/lint/flags"), &l.flags);
                diags.templates(&format!("{base}/lint/backend_flags"), &l.backend_flags);
                diags.defines(&format!("{base}/lint/defines"), &l.defines);
                Step::Lint(BuildStep {
                    flags: l.flags,
                    backend_flags: l.backend_flags,
                    defines: l.defines,
                    main_file: None,
                    expect: expectation(
                        &mut diags,
                        &format!("{base}/lint"),
                        l.fails,
                        l.expect_filename,
                        l.normalize,
                    ),
                })
            }
            StepRaw::Execute(e) => {
                if !seen_compile {
                    diags.push(&base, "execute requires a preceding compile step");
                }
                seen_execute = true;
                diags.templates(&format!("{base}/execute/args"), &e.args);
                Step::Execute(ExecuteStep {
                    args: e.args,
                    check_finished: e.check_finished,
                    expect: expectation(
                        &mut diags,
                        &format!("{base}/execute"),
                        e.fails,
                        e.expect_filename,
                        e.normalize,
                    ),
                })
            }
            StepRaw::Run(r) => {
                if r.cmd.is_empty() {
                    diags.push(format!("{base}/run/cmd"), "cmd must not be empty");
                }
                diags.templates(&format!("{base}/run/cmd"), &r.cmd);
                Step::Run(RunStep {
                    cmd: r.cmd,
                    toolchain_run: r.toolchain_run,
                    expect: expectation(
                        &mut diags,
                        &format!("{base}/run"),
                        r.fails,
                        r.expect_filename,
                        r.normalize,
                    ),
                })
            }
            StepRaw::FilesIdentical(c) => compare_step(
                &mut diags,
                &format!("{base}/files_identical"),
                ComparisonKind::Text,
                c,
            ),
            StepRaw::CoverageIdentical(c) => compare_step(
                &mut diags,
                &format!("{base}/coverage_identical"),
                ComparisonKind::AnnotatedCoverage,
                c,
            ),
            StepRaw::VcdIdentical(v) => {
                let actual = v.actual.unwrap_or_else(|| "{trace}".to_string());
                let golden = v.golden.unwrap_or_else(|| "{golden}".to_string());
                diags.template(&format!("{base}/vcd_identical/actual"), &actual);
                diags.template(&format!("{base}/vcd_identical/golden"), &golden);
                Step::Compare(CompareStep {
                    kind: ComparisonKind::Trace,
                    actual,
                    golden,
                    normalize: NormalizeSpec::default(),
                })
            }
            StepRaw::Passes(PassesRaw {}) => {
                seen_passes = true;
                Step::Passes
            }
        };
        steps.push(step);
    }

    if !seen_passes {
        diags.push("/steps", "the last step must be passes");
    }
    if seen_lint && seen_execute {
        diags.push("/steps", "a case lints or executes, never both");
    }
    if seen_execute {
        for tag in &scenarios {
            if !tag.caps().executes {
                diags.push(
                    "/scenarios",
                    format!("scenario {tag} cannot execute, but the case has an execute step"),
                );
            }
        }
    }

    let top_filename = raw.top_filename.unwrap_or_else(|| format!("{name}.v"));
    let golden_filename = raw.golden_filename.unwrap_or_else(|| format!("{name}.out"));

    if !diags.0.is_empty() {
        return Err(diags.0);
    }
    Ok(Validated {
        scenarios,
        top_filename,
        golden_filename,
        timeout: raw.timeout_secs.map(Duration::from_secs),
        skip: raw.skip,
        steps,
    })
}

fn expectation(
    diags: &mut Diags,
    base: &str,
    fails: bool,
    expect_filename: Option<String>,
    normalize: Option<NormalizeRaw>,
) -> Expectation {
    if let Some(f) = &expect_filename {
        diags.template(&format!("{base}/expect_filename"), f);
    }
    Expectation {
        fails,
        expect_filename,
        normalize: normalize_spec(diags, &format!("{base}/normalize"), normalize),
    }
}

fn compare_step(diags: &mut Diags, base: &str, kind: ComparisonKind, raw: CompareRaw) -> Step {
    diags.template(&format!("{base}/actual"), &raw.actual);
    diags.template(&format!("{base}/golden"), &raw.golden);
    Step::Compare(CompareStep {
        kind,
        actual: raw.actual,
        golden: raw.golden,
        normalize: normalize_spec(diags, &format!("{base}/normalize"), raw.normalize),
    })
}

fn normalize_spec(diags: &mut Diags, base: &str, raw: Option<NormalizeRaw>) -> NormalizeSpec {
    let raw = raw.unwrap_or_default();
    let mut rules = Vec::with_capacity(raw.rules.len());
    for (i, r) in raw.rules.iter().enumerate() {
        match LineRule::new(&r.pattern, &r.replace) {
            Ok(rule) => rules.push(rule),
            Err(err) => diags.push(
                format!("{base}/rules/{i}/pattern"),
                format!("invalid regex: {err}"),
            ),
        }
    }
    NormalizeSpec {
        logfile: raw.logfile,
        rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn load_str(json: &str) -> Result<TestCase, HarnessError> {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("t").join("t_case.json");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, json).expect("write");
        load_case(tmp.path(), &path)
    }

    fn load_err(json: &str) -> String {
        let err = load_str(json).expect_err("load must fail");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        err.to_string()
    }

    #[test]
    fn minimal_case_gets_conventional_defaults() {
        let case = load_str(
            r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["simulator"],
                "steps":[{"compile":{}},{"execute":{"check_finished":true}},{"passes":{}}]}"#,
        )
        .expect("load");
        assert_eq!(case.id, "t/t_case");
        assert_eq!(case.name, "t_case");
        assert_eq!(case.top_filename, "t_case.v");
        assert_eq!(case.golden_filename, "t_case.out");
        assert_eq!(case.scenarios, vec![ScenarioTag::Simulator]);
        assert_eq!(case.steps.len(), 3);
        let (tag, caps) = case.declared_for(ScenarioTag::Vltmt).expect("covered");
        assert_eq!(tag, ScenarioTag::Simulator);
        assert!(caps.executes);
        assert!(case.declared_for(ScenarioTag::Dist).is_none());
    }

    #[test]
    fn verilator_run_is_an_alias_for_toolchain_run() {
        let case = load_str(
            r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],
                "steps":[{"run":{"cmd":["{toolchain_root}/bin/verilator_coverage","--annotate","{obj_dir}/annotated"],"verilator_run":true}},
                         {"passes":{}}]}"#,
        )
        .expect("load");
        let Step::Run(run) = &case.steps[0] else {
            panic!("expected run step");
        };
        assert!(run.toolchain_run);
        assert_eq!(run.cmd.len(), 3);
    }

    #[rstest]
    #[case::unknown_top_key(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"passes":{}}],"extra":1}"#,
        "unknown field `extra`"
    )]
    #[case::unknown_step_key(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"compile":{"v_flags":[]}},{"passes":{}}]}"#,
        "unknown field `v_flags`"
    )]
    #[case::unknown_step_kind(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"simulate":{}},{"passes":{}}]}"#,
        "unknown variant `simulate`"
    )]
    #[case::unknown_tag(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["xsim"],"steps":[{"passes":{}}]}"#,
        "/scenarios/0: unknown scenario tag"
    )]
    #[case::empty_tags(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":[],"steps":[{"passes":{}}]}"#,
        "at least one scenario"
    )]
    #[case::wrong_schema(
        r#"{"schema_version":"hdlreg.case@9","scenarios":["vlt"],"steps":[{"passes":{}}]}"#,
        "schema_version must be hdlreg.case@0.1.0"
    )]
    #[case::no_passes(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"compile":{}}]}"#,
        "the last step must be passes"
    )]
    #[case::step_after_passes(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"passes":{}},{"compile":{}}]}"#,
        "/steps/1: no step may follow passes"
    )]
    #[case::lint_and_execute(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"compile":{}},{"lint":{}},{"execute":{}},{"passes":{}}]}"#,
        "lints or executes, never both"
    )]
    #[case::execute_without_compile(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"execute":{}},{"passes":{}}]}"#,
        "execute requires a preceding compile"
    )]
    #[case::linter_cannot_execute(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["linter"],"steps":[{"compile":{}},{"execute":{}},{"passes":{}}]}"#,
        "scenario linter cannot execute"
    )]
    #[case::bad_placeholder(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"compile":{"flags":["-I{src_dir}"]}},{"passes":{}}]}"#,
        "unknown placeholder {src_dir}"
    )]
    #[case::bad_define_placeholder(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"compile":{"defines":{"DATA":"{data_dir}/x"}}},{"passes":{}}]}"#,
        "/steps/0/compile/defines/DATA: unknown placeholder {data_dir}"
    )]
    #[case::bad_define_name(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["linter"],"steps":[{"lint":{"defines":{"A=B":"1"}}},{"passes":{}}]}"#,
        "invalid define name"
    )]
    #[case::bad_regex(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"steps":[{"files_identical":{"actual":"a","golden":"b","normalize":{"rules":[{"pattern":"("}]}}},{"passes":{}}]}"#,
        "invalid regex"
    )]
    #[case::zero_timeout(
        r#"{"schema_version":"hdlreg.case@0.1.0","scenarios":["vlt"],"timeout_secs":0,"steps":[{"passes":{}}]}"#,
        "timeout_secs must be > 0"
    )]
    fn invalid_cases_are_rejected(#[case] json: &str, #[case] needle: &str) {
        let msg = load_err(json);
        assert!(msg.contains(needle), "{msg}");
    }

    #[test]
    fn placeholders_expand_and_unknown_ones_fail() {
        let ph = Placeholders {
            obj_dir: PathBuf::from("/w/obj_vlt/t_a"),
            case_dir: PathBuf::from("/suite/t"),
            name: "t_a".to_string(),
            top: PathBuf::from("/suite/t/t_a.v"),
            golden: PathBuf::from("/suite/t/t_a.out"),
            toolchain_root: None,
        };
        assert_eq!(
            ph.expand("+define+TEST_OBJ_DIR={obj_dir}").expect("expand"),
            "+define+TEST_OBJ_DIR=/w/obj_vlt/t_a"
        );
        assert_eq!(ph.expand("{trace}").expect("expand"), "/w/obj_vlt/t_a/simx.vcd");
        assert_eq!(ph.expand("-GP={1,2}").expect("literal braces"), "-GP={1,2}");
        assert_eq!(
            ph.expand_path("t_a.out").expect("path"),
            PathBuf::from("/suite/t/t_a.out")
        );

        let err = ph.expand("{toolchain_root}/bin/x").expect_err("no root");
        assert!(err.to_string().contains("VERILATOR_ROOT"), "{err}");
        assert!(ph.expand("{bogus}").is_err());
    }

    #[test]
    fn logfile_normalization_aliases_run_paths() {
        let spec = NormalizeSpec {
            logfile: true,
            rules: Vec::new(),
        };
        let ph = Placeholders {
            obj_dir: PathBuf::from("/w/obj_vlt/t_a"),
            case_dir: PathBuf::from("/suite/t"),
            name: "t_a".to_string(),
            top: PathBuf::from("/suite/t/t_a.v"),
            golden: PathBuf::from("/suite/t/t_a.out"),
            toolchain_root: Some(PathBuf::from("/opt/verilator")),
        };
        let norm = spec.for_run(&ph);
        assert_eq!(
            norm.apply(b"%Warning: /w/obj_vlt/t_a/x.cpp from /opt/verilator/include\n"),
            b"%Warning: <obj_dir>/x.cpp from <toolchain_root>/include\n"
        );
    }
}
