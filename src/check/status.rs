/// Tri-valued status lattice
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// FAIL < WARN < PASS; AND is min, OR is max, NOT swaps FAIL and PASS
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum Status {
    Fail = -1,
    Warn = 0,
    Pass = 1,
}

impl Status {
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Status::Pass
        } else {
            Status::Fail
        }
    }

    pub fn and(self, other: Status) -> Status {
        self.min(other)
    }

    pub fn or(self, other: Status) -> Status {
        self.max(other)
    }

    pub fn negate(self) -> Status {
        match self {
            Status::Fail => Status::Pass,
            Status::Warn => Status::Warn,
            Status::Pass => Status::Fail,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Fail => "fail",
            Status::Warn => "warn",
            Status::Pass => "pass",
        }
    }

    pub fn parse(text: &str) -> Option<Status> {
        match text.trim().to_ascii_lowercase().as_str() {
            "fail" => Some(Status::Fail),
            "warn" => Some(Status::Warn),
            "pass" => Some(Status::Pass),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl BitAnd for Status {
    type Output = Status;

    fn bitand(self, rhs: Status) -> Status {
        self.and(rhs)
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        self.or(rhs)
    }
}

impl Not for Status {
    type Output = Status;

    fn not(self) -> Status {
        self.negate()
    }
}

/// Reduction applied by a nested block to its children
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    All,
    Any,
    NotAll,
    NotAny,
}

impl BlockKind {
    /// `All` folds AND from one PASS seed, `Any` folds OR from one FAIL seed
    pub fn reduce<I: IntoIterator<Item = Status>>(self, statuses: I) -> Status {
        match self {
            BlockKind::All => statuses.into_iter().fold(Status::Pass, Status::and),
            BlockKind::Any => statuses.into_iter().fold(Status::Fail, Status::or),
            BlockKind::NotAll => !BlockKind::All.reduce(statuses),
            BlockKind::NotAny => !BlockKind::Any.reduce(statuses),
        }
    }

    pub fn default_text(self) -> &'static str {
        match self {
            BlockKind::All => "all tests must pass",
            BlockKind::Any => "any test must pass",
            BlockKind::NotAll => "any test must fail",
            BlockKind::NotAny => "all tests must fail",
        }
    }
}
