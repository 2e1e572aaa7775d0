//! Shared, version-pinned identifiers.
//!
//! These constants are the single source of truth for schema/version strings that
//! appear in machine-readable I/O (case files, suite reports) and for the environment
//! variables the harness consults.

pub const CASE_SCHEMA_VERSION: &str = "hdlreg.case@0.1.0";
pub const REPORT_SCHEMA_VERSION: &str = "hdlreg.report@0.1.0";

/// Toolchain root. Backends live under `$VERILATOR_ROOT/bin`.
pub const TOOLCHAIN_ROOT_ENV: &str = "VERILATOR_ROOT";

/// Log filter for the `hdlreg` binary (tracing `EnvFilter` syntax).
pub const LOG_FILTER_ENV: &str = "HDLREG_LOG";

/// Line a simulation prints when the testbench reached `$finish` normally.
pub const ALL_FINISHED_MARKER: &str = "*-* All Finished *-*";

/// Harness-assigned trace filename inside each obj_dir.
pub const TRACE_FILENAME: &str = "simx.vcd";
