//! Scenario dispatch: concrete scenario -> backend executable and default flags.

use std::path::{Path, PathBuf};

use hdlreg_contracts::TOOLCHAIN_ROOT_ENV;
use hdlreg_scenarios::{ScenarioTag, ALL_TAGS};

use crate::case::Placeholders;
use crate::error::HarnessError;

const VLT_COMPILE_DEFAULTS: &[&str] = &[
    "--cc",
    "--exe",
    "--build",
    "-Mdir",
    "{obj_dir}",
    "--prefix",
    "V{name}",
    "+define+TEST_OBJ_DIR={obj_dir}",
];
const VLT_LINT_DEFAULTS: &[&str] = &["-Mdir", "{obj_dir}", "+define+TEST_OBJ_DIR={obj_dir}"];
const MT_EXTRA: &[&str] = &["--threads", "2"];
const ARTIFACT_TEMPLATE: &str = "{obj_dir}/V{name}";

/// Resolved invocation template for one concrete scenario.
#[derive(Debug, Clone)]
pub struct Backend {
    pub scenario: ScenarioTag,
    pub executable: PathBuf,
    compile_defaults: Vec<&'static str>,
    lint_defaults: Vec<&'static str>,
}

impl Backend {
    pub fn compile_defaults(&self, ph: &Placeholders) -> Result<Vec<String>, HarnessError> {
        self.compile_defaults.iter().map(|t| ph.expand(t)).collect()
    }

    pub fn lint_defaults(&self, ph: &Placeholders) -> Result<Vec<String>, HarnessError> {
        self.lint_defaults.iter().map(|t| ph.expand(t)).collect()
    }
}

/// Path of the executable model a successful compile leaves behind.
pub fn artifact_path(ph: &Placeholders) -> Result<PathBuf, HarnessError> {
    ph.expand(ARTIFACT_TEMPLATE).map(PathBuf::from)
}

/// Maps scenario tags to backends.
///
/// The toolchain root is fixed at construction so one suite run sees one consistent
/// value; the suite builds a fresh dispatcher per run.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    toolchain_root: Option<PathBuf>,
    backend_override: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(toolchain_root: Option<PathBuf>, backend_override: Option<PathBuf>) -> Self {
        Self {
            toolchain_root: toolchain_root.filter(|p| !p.as_os_str().is_empty()),
            backend_override,
        }
    }

    /// Explicit root wins; otherwise read the toolchain root variable now.
    pub fn from_env(
        toolchain_root: Option<PathBuf>,
        backend_override: Option<PathBuf>,
    ) -> Self {
        let root =
            toolchain_root.or_else(|| std::env::var_os(TOOLCHAIN_ROOT_ENV).map(PathBuf::from));
        Self::new(root, backend_override)
    }

    pub fn toolchain_root(&self) -> Option<&Path> {
        self.toolchain_root.as_deref()
    }

    /// Toolchain root, or a configuration error naming the variable that should hold it.
    pub fn require_toolchain_root(&self, why: &str) -> Result<&Path, HarnessError> {
        self.toolchain_root().ok_or_else(|| {
            HarnessError::config(format!(
                "{TOOLCHAIN_ROOT_ENV} is not set (and no --toolchain-root given); {why}"
            ))
        })
    }

    pub fn resolve(&self, scenario: ScenarioTag) -> Result<Backend, HarnessError> {
        if !scenario.is_concrete() {
            return Err(HarnessError::config(format!(
                "scenario {scenario} is a group, not a run scenario"
            )));
        }
        let (compile_defaults, lint_defaults) = match scenario {
            ScenarioTag::Vlt => (VLT_COMPILE_DEFAULTS.to_vec(), VLT_LINT_DEFAULTS.to_vec()),
            ScenarioTag::Vltmt => (
                [VLT_COMPILE_DEFAULTS, MT_EXTRA].concat(),
                [VLT_LINT_DEFAULTS, MT_EXTRA].concat(),
            ),
            _ => {
                return Err(HarnessError::config(format!(
                    "scenario {scenario} has no compiler backend"
                )))
            }
        };

        let executable = match &self.backend_override {
            Some(path) => path.clone(),
            None => self
                .require_toolchain_root(&format!(
                    "scenario {scenario} needs {TOOLCHAIN_ROOT_ENV}/bin/verilator"
                ))?
                .join("bin")
                .join("verilator"),
        };

        Ok(Backend {
            scenario,
            executable,
            compile_defaults,
            lint_defaults,
        })
    }
}

/// Parse a tag written in a case file.
pub fn parse_tag(raw: &str) -> Result<ScenarioTag, HarnessError> {
    ScenarioTag::parse(raw).ok_or_else(|| {
        let allowed: Vec<&str> = ALL_TAGS.iter().map(|t| t.as_str()).collect();
        HarnessError::config(format!(
            "unknown scenario tag {raw:?} (allowed: {})",
            allowed.join(", ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn placeholders() -> Placeholders {
        Placeholders {
            obj_dir: PathBuf::from("/w/obj_vlt/t_a"),
            case_dir: PathBuf::from("/suite/t"),
            name: "t_a".to_string(),
            top: PathBuf::from("/suite/t/t_a.v"),
            golden: PathBuf::from("/suite/t/t_a.out"),
            toolchain_root: Some(PathBuf::from("/opt/verilator")),
        }
    }

    #[test]
    fn vlt_resolves_under_toolchain_root() {
        let d = Dispatcher::new(Some("/opt/verilator".into()), None);
        let b = d.resolve(ScenarioTag::Vlt).expect("resolve");
        assert_eq!(b.executable, PathBuf::from("/opt/verilator/bin/verilator"));
        assert_eq!(
            b.compile_defaults(&placeholders()).expect("expand"),
            vec![
                "--cc",
                "--exe",
                "--build",
                "-Mdir",
                "/w/obj_vlt/t_a",
                "--prefix",
                "Vt_a",
                "+define+TEST_OBJ_DIR=/w/obj_vlt/t_a",
            ]
        );
        assert_eq!(
            artifact_path(&placeholders()).expect("artifact"),
            PathBuf::from("/w/obj_vlt/t_a/Vt_a")
        );
    }

    #[test]
    fn vltmt_adds_threads() {
        let d = Dispatcher::new(Some("/opt/verilator".into()), None);
        let b = d.resolve(ScenarioTag::Vltmt).expect("resolve");
        let lint = b.lint_defaults(&placeholders()).expect("expand");
        assert_eq!(&lint[lint.len() - 2..], &["--threads", "2"]);
    }

    #[test]
    fn backend_override_needs_no_root() {
        let d = Dispatcher::new(None, Some("/tmp/fake-verilator".into()));
        let b = d.resolve(ScenarioTag::Vlt).expect("resolve");
        assert_eq!(b.executable, PathBuf::from("/tmp/fake-verilator"));
    }

    #[test]
    fn missing_root_names_the_variable() {
        let d = Dispatcher::new(None, None);
        let err = d.resolve(ScenarioTag::Vlt).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("VERILATOR_ROOT"), "{err}");
    }

    #[test]
    fn dist_and_groups_have_no_backend() {
        let d = Dispatcher::new(Some("/opt/verilator".into()), None);
        for tag in [ScenarioTag::Dist, ScenarioTag::Simulator, ScenarioTag::Linter] {
            let err = d.resolve(tag).expect_err("must fail");
            assert_eq!(err.kind(), ErrorKind::Configuration, "{tag}");
        }
    }

    #[test]
    fn unknown_tag_is_a_configuration_error() {
        let err = parse_tag("xsim").expect_err("must fail");
        assert!(err.to_string().contains("unknown scenario tag \"xsim\""), "{err}");
        assert_eq!(parse_tag("simulator_st").expect("tag"), ScenarioTag::SimulatorSt);
    }
}
