//! Self-correcting pipeline synthesis agent.
//!
//! The agent profiles a folder of tabular files, asks a generative model for a
//! program that merges them into one dataset, executes it, and feeds any
//! failure back to the model for a bounded number of corrective rounds. On
//! success it asks the model for a lineage report of the program that ran.
//!
//! - **[`core`]**: pure logic (sanitizing, attempt accounting, fault parsing).
//! - **[`io`]**: side effects (model clients, subprocess execution, files).
//!
//! [`correction`] drives the generate/execute/correct state machine,
//! [`document`] writes the report, and [`pipeline`] joins them for the CLI.

pub mod core;
pub mod correction;
pub mod document;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
