use regex::Regex;
use sha2::{Digest, Sha256};

use crate::ComparisonResult;

const EXCERPT_CONTEXT_LINES: usize = 5;

/// Regex substitution applied to every line of both sides.
#[derive(Debug, Clone)]
pub struct LineRule {
    regex: Regex,
    replace: String,
}

impl LineRule {
    pub fn new(pattern: &str, replace: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            replace: replace.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Opt-in, line-based normalization applied identically to actual and golden text.
///
/// The default value normalizes nothing and the comparison is byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct Normalization {
    /// Toolchain log preset: CRLF, trailing whitespace, and `- V...` status lines.
    pub logfile: bool,
    /// Literal replacements (concrete paths → stable aliases), applied before `rules`.
    pub aliases: Vec<(String, String)>,
    pub rules: Vec<LineRule>,
}

impl Normalization {
    pub fn logfile() -> Self {
        Self {
            logfile: true,
            ..Self::default()
        }
    }

    pub fn with_alias(mut self, literal: impl Into<String>, alias: impl Into<String>) -> Self {
        let literal = literal.into();
        if !literal.is_empty() {
            self.aliases.push((literal, alias.into()));
        }
        self
    }

    pub fn is_noop(&self) -> bool {
        !self.logfile && self.aliases.is_empty() && self.rules.is_empty()
    }

    /// Normalize `bytes` line by line. Lines that are not UTF-8 are kept as raw bytes;
    /// only the logfile preset's trimming and status-line removal reach them.
    pub fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        if self.is_noop() {
            return bytes.to_vec();
        }

        let mut out = Vec::with_capacity(bytes.len());
        for line in split_lines(bytes) {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if self.logfile && is_toolchain_status_line(line) {
                continue;
            }
            match std::str::from_utf8(line) {
                Ok(text) => out.extend_from_slice(self.apply_line(text).as_bytes()),
                Err(_) if self.logfile => out.extend_from_slice(line.trim_ascii_end()),
                Err(_) => out.extend_from_slice(line),
            }
            out.push(b'\n');
        }
        out
    }

    fn apply_line(&self, line: &str) -> String {
        let mut line = line.to_string();
        for (literal, alias) in &self.aliases {
            if line.contains(literal.as_str()) {
                line = line.replace(literal.as_str(), alias);
            }
        }
        for rule in &self.rules {
            line = rule
                .regex
                .replace_all(&line, rule.replace.as_str())
                .into_owned();
        }
        if self.logfile {
            line.truncate(line.trim_end().len());
        }
        line
    }
}

fn is_toolchain_status_line(line: &[u8]) -> bool {
    line.starts_with(b"- V")
}

/// `str::lines` over bytes: split on `\n`, no empty line after a final newline.
fn split_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let empty = bytes.is_empty();
    body.split(|&b| b == b'\n').filter(move |_| !empty)
}

/// Identity is decided on bytes; decoding is only used to render the summary.
pub(crate) fn compare_bytes(actual: &[u8], golden: &[u8], norm: &Normalization) -> ComparisonResult {
    if actual == golden {
        return ComparisonResult::Identical;
    }
    if norm.is_noop() {
        return ComparisonResult::Mismatch {
            summary: summarize_mismatch(actual, golden, actual, golden),
        };
    }
    let actual_norm = norm.apply(actual);
    let golden_norm = norm.apply(golden);
    if actual_norm == golden_norm {
        return ComparisonResult::Identical;
    }
    ComparisonResult::Mismatch {
        summary: summarize_mismatch(&actual_norm, &golden_norm, actual, golden),
    }
}

fn summarize_mismatch(
    actual_norm: &[u8],
    golden_norm: &[u8],
    actual_raw: &[u8],
    golden_raw: &[u8],
) -> String {
    let actual_lines: Vec<&[u8]> = actual_norm.split(|&b| b == b'\n').collect();
    let golden_lines: Vec<&[u8]> = golden_norm.split(|&b| b == b'\n').collect();

    let first = actual_lines
        .iter()
        .zip(golden_lines.iter())
        .position(|(a, g)| a != g)
        .unwrap_or_else(|| actual_lines.len().min(golden_lines.len()));

    let mut out = String::new();
    out.push_str(&format!("first difference at line {}\n", first + 1));
    out.push_str(&format!(
        "  golden: {}\n",
        show_line(golden_lines.get(first).copied())
    ));
    out.push_str(&format!(
        "  actual: {}\n",
        show_line(actual_lines.get(first).copied())
    ));
    out.push_str(&format!(
        "golden: {} lines sha256={}\n",
        split_lines(golden_norm).count(),
        sha256_hex(golden_raw)
    ));
    out.push_str(&format!(
        "actual: {} lines sha256={}\n",
        split_lines(actual_norm).count(),
        sha256_hex(actual_raw)
    ));
    push_excerpt(&mut out, "--- golden", &golden_lines, first);
    push_excerpt(&mut out, "+++ actual", &actual_lines, first);
    out
}

fn push_excerpt(out: &mut String, label: &str, lines: &[&[u8]], first: usize) {
    let end = (first + EXCERPT_CONTEXT_LINES).min(lines.len());
    if first >= end {
        out.push_str(&format!("{label} (no lines from {})\n", first + 1));
        return;
    }
    out.push_str(&format!("{label} (lines {}-{})\n", first + 1, end));
    for line in &lines[first..end] {
        out.push_str("  | ");
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
}

fn show_line(line: Option<&[u8]>) -> String {
    match line {
        Some(l) => format!("\"{}\"", l.escape_ascii()),
        None => "<end of file>".to_string(),
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(LUT[(b >> 4) as usize] as char);
        out.push(LUT[(b & 0x0F) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_normalization_is_byte_exact() {
        let norm = Normalization::default();
        assert!(compare_bytes(b"a\r\n", b"a\r\n", &norm).is_identical());
        assert!(!compare_bytes(b"a\r\n", b"a\n", &norm).is_identical());
        assert!(!compare_bytes(b"a \n", b"a\n", &norm).is_identical());
    }

    #[test]
    fn differing_invalid_utf8_is_a_mismatch() {
        let ComparisonResult::Mismatch { summary } =
            compare_bytes(b"x\xff\n", b"x\xfe\n", &Normalization::default())
        else {
            panic!("expected mismatch");
        };
        assert!(summary.contains(r#"golden: "x\xfe""#), "{summary}");
        assert!(summary.contains(r#"actual: "x\xff""#), "{summary}");

        let norm = Normalization::logfile();
        assert!(!compare_bytes(b"x\xff  \r\n", b"x\xfe\n", &norm).is_identical());
        assert!(compare_bytes(b"x\xff  \r\n", b"x\xff\n", &norm).is_identical());
    }

    #[test]
    fn logfile_preset_strips_volatile_lines_and_paths() {
        let norm = Normalization::logfile().with_alias("/tmp/run42/obj_vlt/t_x", "<obj_dir>");
        let actual = b"%Error: /tmp/run42/obj_vlt/t_x/a.v:3: bad   \r\n- V e r i l a t i o n   R e p o r t: 0.1 s\n";
        let golden = b"%Error: <obj_dir>/a.v:3: bad\n";
        assert!(compare_bytes(actual, golden, &norm).is_identical());
    }

    #[test]
    fn regex_rules_apply_to_both_sides() {
        let mut norm = Normalization::default();
        norm.rules
            .push(LineRule::new(r"at \d+ps", "at <time>").expect("regex"));
        assert!(compare_bytes(b"done at 120ps\n", b"done at 7ps\n", &norm).is_identical());
        assert!(!compare_bytes(b"done at 120ps\n", b"fail at 7ps\n", &norm).is_identical());
    }

    #[test]
    fn mismatch_summary_points_at_first_differing_line() {
        let ComparisonResult::Mismatch { summary } =
            compare_bytes(b"a\nb\nX\nd\n", b"a\nb\nc\nd\n", &Normalization::default())
        else {
            panic!("expected mismatch");
        };
        assert!(summary.starts_with("first difference at line 3\n"), "{summary}");
        assert!(summary.contains("golden: \"c\""), "{summary}");
        assert!(summary.contains("actual: \"X\""), "{summary}");
        assert!(summary.contains("sha256="), "{summary}");
    }

    #[test]
    fn mismatch_on_extra_trailing_lines_reports_end_of_file() {
        let ComparisonResult::Mismatch { summary } =
            compare_bytes(b"a\nb", b"a", &Normalization::default())
        else {
            panic!("expected mismatch");
        };
        assert!(summary.contains("first difference at line 2"), "{summary}");
        assert!(summary.contains("golden: <end of file>"), "{summary}");
    }
}
