//! Scenario registry.
//!
//! This crate exists so both:
//! - the case loader (validating declared tags)
//! - the dispatcher and suite scheduler (picking run scenarios)
//!
//! can share an authoritative list of scenarios and what each one is able to do.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(feature = "clap", value(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ScenarioTag {
    /// Distribution checks; no backend is launched.
    Dist,
    /// Single-threaded verilated model.
    #[default]
    Vlt,
    /// Multi-threaded verilated model.
    Vltmt,
    /// Any simulator able to build and run the design.
    Simulator,
    /// Single-threaded simulators only.
    SimulatorSt,
    /// Lint-only: diagnostics, never an executable.
    Linter,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ScenarioCaps {
    pub compiles: bool,
    pub executes: bool,
    pub traces: bool,
    pub coverage: bool,
}

impl ScenarioCaps {
    pub const NONE: ScenarioCaps = ScenarioCaps {
        compiles: false,
        executes: false,
        traces: false,
        coverage: false,
    };

    pub const FULL: ScenarioCaps = ScenarioCaps {
        compiles: true,
        executes: true,
        traces: true,
        coverage: true,
    };

    pub fn intersect(self, other: ScenarioCaps) -> ScenarioCaps {
        ScenarioCaps {
            compiles: self.compiles && other.compiles,
            executes: self.executes && other.executes,
            traces: self.traces && other.traces,
            coverage: self.coverage && other.coverage,
        }
    }
}

pub const ALL_TAGS: &[ScenarioTag] = &[
    ScenarioTag::Dist,
    ScenarioTag::Vlt,
    ScenarioTag::Vltmt,
    ScenarioTag::Simulator,
    ScenarioTag::SimulatorSt,
    ScenarioTag::Linter,
];

impl ScenarioTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioTag::Dist => "dist",
            ScenarioTag::Vlt => "vlt",
            ScenarioTag::Vltmt => "vltmt",
            ScenarioTag::Simulator => "simulator",
            ScenarioTag::SimulatorSt => "simulator_st",
            ScenarioTag::Linter => "linter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "dist" => Some(ScenarioTag::Dist),
            "vlt" => Some(ScenarioTag::Vlt),
            "vltmt" => Some(ScenarioTag::Vltmt),
            "simulator" => Some(ScenarioTag::Simulator),
            "simulator_st" => Some(ScenarioTag::SimulatorSt),
            "linter" => Some(ScenarioTag::Linter),
            _ => None,
        }
    }

    /// True for tags a suite can actually run under (as opposed to groups a case declares).
    pub fn is_concrete(self) -> bool {
        matches!(self, ScenarioTag::Dist | ScenarioTag::Vlt | ScenarioTag::Vltmt)
    }

    /// Concrete run scenarios this tag stands for.
    pub fn expand(self) -> &'static [ScenarioTag] {
        match self {
            ScenarioTag::Dist => &[ScenarioTag::Dist],
            ScenarioTag::Vlt => &[ScenarioTag::Vlt],
            ScenarioTag::Vltmt => &[ScenarioTag::Vltmt],
            ScenarioTag::Simulator | ScenarioTag::Linter => {
                &[ScenarioTag::Vlt, ScenarioTag::Vltmt]
            }
            ScenarioTag::SimulatorSt => &[ScenarioTag::Vlt],
        }
    }

    pub fn covers(self, run: ScenarioTag) -> bool {
        self.expand().contains(&run)
    }

    pub fn caps(self) -> ScenarioCaps {
        match self {
            ScenarioTag::Dist => ScenarioCaps::NONE,
            ScenarioTag::Vlt
            | ScenarioTag::Vltmt
            | ScenarioTag::Simulator
            | ScenarioTag::SimulatorSt => ScenarioCaps::FULL,
            ScenarioTag::Linter => ScenarioCaps {
                compiles: true,
                executes: false,
                traces: false,
                coverage: false,
            },
        }
    }
}

impl std::fmt::Display for ScenarioTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
