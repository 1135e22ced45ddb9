//! gradebox: a sandboxed assessment harness for student programs
//!
//! # Architecture
//!
//! ## Parse trees and queries
//! - [`tree`]: arena forest holding JSON parse-tree dumps with source ranges
//! - [`query`]: structural pattern matching with macros and pinned ancestors
//!
//! ## Checks ([`check`])
//! - [`check::status`]: the FAIL/WARN/PASS lattice and block reductions
//! - [`check::recorder`]: nested blocks and containment of failures
//!
//! ## Execution ([`exec`])
//! - [`exec::sandbox`]: the sandbox wrapper command line
//! - [`exec::controller`]: expect/send over a pty or pipes, escalating termination
//! - [`exec::output`]: bounded output capture
//!
//! ## Language backends ([`judge`])
//! - [`judge::adapter`]: the backend trait, diagnostics and declarations
//! - [`judge::languages`]: C (gcc, Dr. Memory) and Python backends
//! - [`judge::source`]: per-submission source index
//!
//! ## Evaluation ([`harness`])
//! - [`harness::submission`]: working copy, check tree and contained evaluation
//! - [`harness::run`]: one build-and-execute block
//! - [`harness::script`]: declarative JSON assessment scripts
//! - [`harness::archive`]: `test-NNN.zip` archives
//!
//! ## Reporting ([`report`])
//! - CSV, JSON and HTML renderings of archived check trees
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: harness settings and the crate error type
//! - [`config::loader`]: `gradebox.json` loading
//! - [`config::validator`]: settings validation before evaluation

// Parse trees and queries
pub mod query;
pub mod tree;

// Checks
pub mod check;

// Execution
pub mod exec;

// Language backends
pub mod judge;

// Evaluation
pub mod harness;

// Reporting
pub mod report;

// Configuration
pub mod config;

// CLI entrypoint for the gradebox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
