/// The per-submission check tree
use crate::check::status::Status;
use serde::{Deserialize, Serialize};

/// One assertion; nested blocks carry their children in `checks`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub status: Status,
    pub text: String,
    #[serde(default)]
    pub details: Option<String>,
    /// Generated by the harness rather than written by the test author
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl Check {
    pub fn new(status: Status, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
            details: None,
            auto: false,
            checks: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    /// Depth-first walk with dotted ids relative to `prefix` (`1`, `1.2`, ...)
    pub fn walk<'a>(&'a self, prefix: &str, visit: &mut dyn FnMut(&str, &'a Check)) {
        visit(prefix, self);
        for (index, child) in self.checks.iter().enumerate() {
            let id = format!("{}.{}", prefix, index + 1);
            child.walk(&id, visit);
        }
    }

    /// Number of checks in the tree, this one included
    pub fn count(&self) -> usize {
        1 + self.checks.iter().map(Check::count).sum::<usize>()
    }
}
