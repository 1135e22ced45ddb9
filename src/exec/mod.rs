//! Execution control
//!
//! Launches a rendered build+run script inside the sandbox wrapper, exchanges
//! input and output with it, and owns its termination.

pub mod controller;
pub mod output;
pub mod sandbox;

pub use controller::{ControllerOptions, ProcessController, RunState, Termination};
pub use output::{OutputCapture, OutputIntegrity};
pub use sandbox::SandboxCommand;
