//! Value Change Dump parsing and structural equivalence.
//!
//! Two dumps are equivalent when they declare the same hierarchy, use the same
//! timescale, and make the same value changes at the same timestamps. Identifier
//! codes, header comments/dates/versions, and the order in which *different*
//! signals change within one timestamp are not significant. Order across
//! timestamps always is.

use std::collections::{BTreeSet, HashMap};

use crate::ComparisonResult;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VcdError {
    #[error("line {line}: {keyword} section is missing $end")]
    Unterminated { keyword: String, line: usize },
    #[error("line {line}: malformed $var declaration")]
    BadVar { line: usize },
    #[error("line {line}: malformed $scope declaration")]
    BadScope { line: usize },
    #[error("line {line}: $upscope without a matching $scope")]
    UnbalancedUpscope { line: usize },
    #[error("line {line}: invalid timestamp {token:?}")]
    BadTime { token: String, line: usize },
    #[error("line {line}: timestamp #{time} goes backwards (previous #{previous})")]
    TimeWentBackwards { time: u64, previous: u64, line: usize },
    #[error("line {line}: value change for undeclared identifier {id:?}")]
    UnknownId { id: String, line: usize },
    #[error("line {line}: value {value:?} has no identifier")]
    MissingId { value: String, line: usize },
    #[error("line {line}: unexpected token {token:?}")]
    UnexpectedToken { token: String, line: usize },
    #[error("missing $enddefinitions")]
    NoDefinitions,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarDecl {
    /// Dotted hierarchical name including any bit-range suffix, e.g. `top.t.data[7:0]`.
    pub path: String,
    pub var_type: String,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeDecl {
    /// Dotted path of the scope itself, e.g. `top.sub`.
    pub path: String,
    /// `module`, `task`, `function`, `begin`, `fork`, ...
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub signal: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSection {
    pub time: u64,
    /// Sorted by signal name; per-signal order is the order in the dump.
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VcdDump {
    pub timescale: Option<String>,
    /// Every declared scope, including ones with no variables.
    pub scopes: BTreeSet<ScopeDecl>,
    pub vars: BTreeSet<VarDecl>,
    pub sections: Vec<TimeSection>,
}

struct Token<'a> {
    text: &'a str,
    line: usize,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        for tok in line.split_whitespace() {
            out.push(Token {
                text: tok,
                line: idx + 1,
            });
        }
    }
    out
}

struct Cursor<'a> {
    toks: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Option<&Token<'a>> {
        let tok = self.toks.get(self.pos)?;
        self.pos += 1;
        Some(tok)
    }

    /// Collect tokens up to (not including) the next `$end`, consuming the `$end`.
    fn until_end(&mut self, keyword: &str, line: usize) -> Result<Vec<&'a str>, VcdError> {
        let mut out = Vec::new();
        while let Some(tok) = self.toks.get(self.pos) {
            self.pos += 1;
            if tok.text == "$end" {
                return Ok(out);
            }
            out.push(tok.text);
        }
        Err(VcdError::Unterminated {
            keyword: keyword.to_string(),
            line,
        })
    }
}

#[derive(Clone)]
struct IdTarget {
    path: String,
    width: u32,
}

pub fn parse(text: &str) -> Result<VcdDump, VcdError> {
    let mut cur = Cursor {
        toks: tokenize(text),
        pos: 0,
    };
    let mut dump = VcdDump::default();
    let mut scopes: Vec<String> = Vec::new();
    let mut ids: HashMap<String, Vec<IdTarget>> = HashMap::new();

    let mut in_header = true;
    while in_header {
        let Some(tok) = cur.next() else {
            return Err(VcdError::NoDefinitions);
        };
        let (text, line) = (tok.text, tok.line);
        match text {
            "$date" | "$version" | "$comment" => {
                cur.until_end(text, line)?;
            }
            "$timescale" => {
                dump.timescale = Some(cur.until_end(text, line)?.concat());
            }
            "$scope" => {
                let body = cur.until_end(text, line)?;
                let [kind, name] = body.as_slice() else {
                    return Err(VcdError::BadScope { line });
                };
                scopes.push((*name).to_string());
                dump.scopes.insert(ScopeDecl {
                    path: scopes.join("."),
                    kind: (*kind).to_string(),
                });
            }
            "$upscope" => {
                cur.until_end(text, line)?;
                if scopes.pop().is_none() {
                    return Err(VcdError::UnbalancedUpscope { line });
                }
            }
            "$var" => {
                let body = cur.until_end(text, line)?;
                if body.len() < 4 {
                    return Err(VcdError::BadVar { line });
                }
                let width: u32 = body[1].parse().map_err(|_| VcdError::BadVar { line })?;
                let mut path = scopes.join(".");
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(&body[3..].concat());
                dump.vars.insert(VarDecl {
                    path: path.clone(),
                    var_type: body[0].to_string(),
                    width,
                });
                ids.entry(body[2].to_string())
                    .or_default()
                    .push(IdTarget { path, width });
            }
            "$enddefinitions" => {
                cur.until_end(text, line)?;
                in_header = false;
            }
            _ => {
                return Err(VcdError::UnexpectedToken {
                    token: text.to_string(),
                    line,
                })
            }
        }
    }

    let mut current: Option<TimeSection> = None;
    while let Some(tok) = cur.next() {
        let (text, line) = (tok.text, tok.line);
        match text {
            "$dumpvars" | "$dumpall" | "$dumpon" | "$dumpoff" | "$end" => continue,
            "$comment" => {
                cur.until_end(text, line)?;
                continue;
            }
            _ => {}
        }

        if let Some(rest) = text.strip_prefix('#') {
            let time: u64 = rest.parse().map_err(|_| VcdError::BadTime {
                token: text.to_string(),
                line,
            })?;
            match current.take() {
                Some(section) if section.time == time => current = Some(section),
                Some(section) if time < section.time => {
                    return Err(VcdError::TimeWentBackwards {
                        time,
                        previous: section.time,
                        line,
                    })
                }
                Some(section) => {
                    dump.sections.push(section);
                    current = Some(TimeSection {
                        time,
                        changes: Vec::new(),
                    });
                }
                None => {
                    current = Some(TimeSection {
                        time,
                        changes: Vec::new(),
                    })
                }
            }
            continue;
        }

        let mut chars = text.chars();
        let Some(lead) = chars.next() else { continue };
        let (value, id) = match lead {
            '0' | '1' | 'x' | 'X' | 'z' | 'Z' => {
                let id = chars.as_str();
                if id.is_empty() {
                    return Err(VcdError::MissingId {
                        value: text.to_string(),
                        line,
                    });
                }
                (lead.to_ascii_lowercase().to_string(), id.to_string())
            }
            'b' | 'B' | 'r' | 'R' | 's' | 'S' => {
                let Some(id_tok) = cur.next() else {
                    return Err(VcdError::MissingId {
                        value: text.to_string(),
                        line,
                    });
                };
                let value = match lead {
                    'b' | 'B' => format!("b{}", chars.as_str().to_ascii_lowercase()),
                    'r' | 'R' => format!("r{}", canonical_real(chars.as_str())),
                    _ => format!("s{}", chars.as_str()),
                };
                (value, id_tok.text.to_string())
            }
            _ => {
                return Err(VcdError::UnexpectedToken {
                    token: text.to_string(),
                    line,
                })
            }
        };

        let Some(targets) = ids.get(&id) else {
            return Err(VcdError::UnknownId { id, line });
        };
        let section = current.get_or_insert_with(|| TimeSection {
            time: 0,
            changes: Vec::new(),
        });
        for target in targets {
            section.changes.push(Change {
                signal: target.path.clone(),
                value: extend_vector(&value, target.width),
            });
        }
    }
    if let Some(section) = current {
        dump.sections.push(section);
    }

    dump.sections.retain(|s| !s.changes.is_empty());
    for section in &mut dump.sections {
        section.changes.sort_by(|a, b| a.signal.cmp(&b.signal));
    }
    Ok(dump)
}

/// Left-extend a `b...` vector value to `width` bits per VCD rules.
fn extend_vector(value: &str, width: u32) -> String {
    let Some(bits) = value.strip_prefix('b') else {
        return value.to_string();
    };
    let width = width as usize;
    if bits.len() >= width {
        return value.to_string();
    }
    let pad = match bits.chars().next() {
        Some('x') => 'x',
        Some('z') => 'z',
        _ => '0',
    };
    let mut out = String::with_capacity(width + 1);
    out.push('b');
    out.extend(std::iter::repeat(pad).take(width - bits.len()));
    out.push_str(bits);
    out
}

fn canonical_real(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(v) => format!("{v:?}"),
        Err(_) => raw.to_string(),
    }
}

/// `None` when equivalent, otherwise a human-readable description of the first difference.
pub fn diff(actual: &VcdDump, golden: &VcdDump) -> Option<String> {
    if actual.timescale != golden.timescale {
        return Some(format!(
            "timescale differs: golden {:?}, actual {:?}",
            golden.timescale, actual.timescale
        ));
    }

    if actual.scopes != golden.scopes || actual.vars != golden.vars {
        let mut out = String::from("hierarchy differs");
        push_set_diff(&mut out, &actual.scopes, &golden.scopes, |scope| {
            format!("$scope {} {}", scope.kind, scope.path)
        });
        push_set_diff(&mut out, &actual.vars, &golden.vars, |var| {
            format!("{} {} [{}]", var.var_type, var.path, var.width)
        });
        return Some(out);
    }

    for (idx, (a, g)) in actual.sections.iter().zip(golden.sections.iter()).enumerate() {
        if a.time != g.time {
            return Some(format!(
                "time section {} differs: golden #{}, actual #{}",
                idx + 1,
                g.time,
                a.time
            ));
        }
        if a.changes == g.changes {
            continue;
        }
        let pos = a
            .changes
            .iter()
            .zip(g.changes.iter())
            .position(|(ac, gc)| ac != gc);
        return Some(match pos {
            Some(i) => {
                let (ac, gc) = (&a.changes[i], &g.changes[i]);
                if ac.signal == gc.signal {
                    format!(
                        "at #{}: {} golden={} actual={}",
                        g.time, gc.signal, gc.value, ac.value
                    )
                } else {
                    format!(
                        "at #{}: golden changes {}={}, actual changes {}={}",
                        g.time, gc.signal, gc.value, ac.signal, ac.value
                    )
                }
            }
            None => {
                let (longer, label) = if a.changes.len() > g.changes.len() {
                    (&a.changes, "actual has extra change")
                } else {
                    (&g.changes, "actual is missing change")
                };
                let c = &longer[a.changes.len().min(g.changes.len())];
                format!("at #{}: {label} {}={}", g.time, c.signal, c.value)
            }
        });
    }

    if actual.sections.len() != golden.sections.len() {
        let common = actual.sections.len().min(golden.sections.len());
        let (label, section) = if actual.sections.len() > golden.sections.len() {
            ("actual continues", &actual.sections[common])
        } else {
            ("actual ends early; golden continues", &golden.sections[common])
        };
        return Some(format!(
            "{label} at #{} (golden {} time sections, actual {})",
            section.time,
            golden.sections.len(),
            actual.sections.len()
        ));
    }
    None
}

fn push_set_diff<T: Ord>(
    out: &mut String,
    actual: &BTreeSet<T>,
    golden: &BTreeSet<T>,
    show: impl Fn(&T) -> String,
) {
    let missing: Vec<&T> = golden.difference(actual).collect();
    let extra: Vec<&T> = actual.difference(golden).collect();
    for (label, list) in [("missing from actual", missing), ("not in golden", extra)] {
        if list.is_empty() {
            continue;
        }
        out.push_str(&format!("\n  {label} ({}):", list.len()));
        for item in list.iter().take(8) {
            out.push_str("\n    ");
            out.push_str(&show(item));
        }
    }
}

pub(crate) fn compare_bytes(actual: &[u8], golden: &[u8]) -> ComparisonResult {
    let golden = match parse(&String::from_utf8_lossy(golden)) {
        Ok(d) => d,
        Err(err) => {
            return ComparisonResult::Mismatch {
                summary: format!("golden trace does not parse: {err}"),
            }
        }
    };
    let actual = match parse(&String::from_utf8_lossy(actual)) {
        Ok(d) => d,
        Err(err) => {
            return ComparisonResult::Mismatch {
                summary: format!("actual trace does not parse: {err}"),
            }
        }
    };
    match diff(&actual, &golden) {
        None => ComparisonResult::Identical,
        Some(summary) => ComparisonResult::Mismatch { summary },
    }
}
