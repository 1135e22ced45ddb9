//! Submission evaluation
//!
//! A [`Submission`] owns one working copy and its check tree. Test bodies record
//! checks, open contained blocks, query the parsed sources and drive the program
//! through a [`Run`]. Closing a submission writes its archive.

pub mod archive;
pub mod run;
pub mod script;
pub mod submission;
pub mod workspace;

pub use archive::{read_checks, write_archive};
pub use run::Run;
pub use script::Script;
pub use submission::{evaluate, Submission};
pub use workspace::SubmissionWorkspace;
