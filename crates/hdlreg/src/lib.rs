//! Regression harness for an HDL compiler toolchain.
//!
//! A suite is a directory of JSON case files. Each case is run once per selected
//! scenario: compile or lint through the backend, execute the produced model, run
//! helper tools, then compare what was produced against golden files.

pub mod case;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod suite;

pub use case::{load_case, TestCase};
pub use error::{ErrorKind, HarnessError};
pub use report::{compute_exit_code, finalize_report, SuiteReport, Verdict};
pub use suite::{plan, run_suite, SuiteConfig};
