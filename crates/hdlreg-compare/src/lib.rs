//! Golden-artifact comparison.
//!
//! Three independent comparison kinds share one result type:
//! - text identity (optionally normalized, see [`Normalization`])
//! - trace equivalence for VCD waveform dumps (see [`vcd`])
//! - annotated-coverage identity, which applies the text rule to the output of a
//!   coverage annotator

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

mod text;
pub mod vcd;

pub use text::{LineRule, Normalization};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    Text,
    Trace,
    AnnotatedCoverage,
}

impl ComparisonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonKind::Text => "files_identical",
            ComparisonKind::Trace => "vcd_identical",
            ComparisonKind::AnnotatedCoverage => "coverage_identical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ComparisonResult {
    Identical,
    Mismatch { summary: String },
    MissingGolden { path: PathBuf },
    MissingActual { path: PathBuf },
}

impl ComparisonResult {
    pub fn is_identical(&self) -> bool {
        matches!(self, ComparisonResult::Identical)
    }

    /// One-paragraph explanation suitable for a failure report.
    pub fn describe(&self) -> String {
        match self {
            ComparisonResult::Identical => "identical".to_string(),
            ComparisonResult::Mismatch { summary } => summary.clone(),
            ComparisonResult::MissingGolden { path } => {
                format!("golden file missing: {}", path.display())
            }
            ComparisonResult::MissingActual { path } => {
                format!("actual file missing (never produced): {}", path.display())
            }
        }
    }
}

/// Compare `actual` against `golden` with the rule for `kind`.
///
/// The golden side is checked first, so a case missing both reports the
/// configuration problem rather than the missing output.
pub fn compare_files(
    kind: ComparisonKind,
    actual: &Path,
    golden: &Path,
    norm: &Normalization,
) -> Result<ComparisonResult> {
    let Some(golden_bytes) = read_if_present(golden)? else {
        return Ok(ComparisonResult::MissingGolden {
            path: golden.to_path_buf(),
        });
    };
    let Some(actual_bytes) = read_if_present(actual)? else {
        return Ok(ComparisonResult::MissingActual {
            path: actual.to_path_buf(),
        });
    };

    let result = match kind {
        ComparisonKind::Text | ComparisonKind::AnnotatedCoverage => {
            text::compare_bytes(&actual_bytes, &golden_bytes, norm)
        }
        ComparisonKind::Trace => vcd::compare_bytes(&actual_bytes, &golden_bytes),
    };
    tracing::debug!(
        kind = kind.as_str(),
        actual = %actual.display(),
        golden = %golden.display(),
        identical = result.is_identical(),
        "compared"
    );
    Ok(result)
}

/// Text-identity check of captured output (a step's stderr/stdout) against a golden file.
pub fn compare_output_to_golden(
    actual: &[u8],
    golden: &Path,
    norm: &Normalization,
) -> Result<ComparisonResult> {
    let Some(golden_bytes) = read_if_present(golden)? else {
        return Ok(ComparisonResult::MissingGolden {
            path: golden.to_path_buf(),
        });
    };
    Ok(text::compare_bytes(actual, &golden_bytes, norm))
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
    }
}
