/// Explicit recording-target stack and failure containment for nested blocks
use crate::check::status::{BlockKind, Status};
use crate::check::tree::Check;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Proof that a block was opened; consumed by [`CheckStack::end`]
#[derive(Debug)]
#[must_use = "an open block must be ended"]
pub struct BlockHandle {
    depth: usize,
}

#[derive(Debug)]
struct Frame {
    kind: BlockKind,
    check: Check,
    forced: Option<Status>,
}

/// Stack of open blocks; leaf checks are recorded into the innermost one.
#[derive(Debug)]
pub struct CheckStack {
    frames: Vec<Frame>,
}

impl CheckStack {
    /// Start a tree whose root reduces its children with `All`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            frames: vec![Frame {
                kind: BlockKind::All,
                check: Check::new(Status::Pass, text),
                forced: None,
            }],
        }
    }

    /// Number of open blocks, the root included
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Record a leaf check into the innermost open block
    pub fn record(
        &mut self,
        status: Status,
        text: impl Into<String>,
        details: Option<String>,
        auto: bool,
    ) -> Status {
        let mut check = Check::new(status, text);
        check.details = details;
        check.auto = auto;
        self.push(check);
        status
    }

    /// Append a finished check (or subtree) to the innermost open block
    pub fn push(&mut self, check: Check) {
        if let Some(top) = self.frames.last_mut() {
            top.check.checks.push(check);
        }
    }

    /// Insert checks ahead of those already recorded in the innermost open block
    pub fn prepend(&mut self, checks: Vec<Check>) {
        if let Some(top) = self.frames.last_mut() {
            top.check.checks.splice(0..0, checks);
        }
    }

    /// Open a nested block; checks recorded until it ends attach to it
    pub fn begin(&mut self, kind: BlockKind, text: impl Into<String>, auto: bool) -> BlockHandle {
        let mut check = Check::new(Status::Pass, text);
        check.auto = auto;
        self.frames.push(Frame {
            kind,
            check,
            forced: None,
        });
        BlockHandle {
            depth: self.frames.len() - 1,
        }
    }

    /// Close the block, reduce its children and attach it to its parent.
    ///
    /// Blocks still open above the handle are closed first.
    pub fn end(&mut self, handle: BlockHandle) -> Status {
        self.close_to(handle.depth)
    }

    /// Close the block with a forced FAIL, `reason` appended to its details
    pub fn end_failed(&mut self, handle: BlockHandle, reason: impl Into<String>) -> Status {
        if handle.depth == 0 || handle.depth >= self.frames.len() {
            log::warn!("ending a block that is no longer open");
            return Status::Fail;
        }
        let frame = &mut self.frames[handle.depth];
        frame.forced = Some(Status::Fail);
        let reason = reason.into();
        frame.check.details = Some(match frame.check.details.take() {
            Some(details) => format!("{}\n{}", details, reason),
            None => reason,
        });
        self.close_to(handle.depth)
    }

    /// Close every open block and return the reduced root
    pub fn finish(mut self) -> Check {
        while self.frames.len() > 1 {
            self.close_top();
        }
        match self.frames.pop() {
            Some(root) => seal(root),
            None => Check::new(Status::Fail, "empty check tree"),
        }
    }

    fn close_to(&mut self, depth: usize) -> Status {
        if depth == 0 || depth >= self.frames.len() {
            log::warn!("ending a block that is no longer open");
            return Status::Fail;
        }
        let mut status = Status::Fail;
        while self.frames.len() > depth {
            status = self.close_top();
        }
        status
    }

    fn close_top(&mut self) -> Status {
        match self.frames.pop() {
            Some(frame) => {
                let check = seal(frame);
                let status = check.status;
                self.push(check);
                status
            }
            None => Status::Fail,
        }
    }
}

fn seal(frame: Frame) -> Check {
    let mut check = frame.check;
    let reduced = frame.kind.reduce(check.checks.iter().map(|c| c.status));
    check.status = frame.forced.unwrap_or(reduced);
    check
}

/// Anything that records checks through a [`CheckStack`]
pub trait Recorder {
    fn checks(&mut self) -> &mut CheckStack;

    /// Log tracebacks of contained failures
    fn debug(&self) -> bool {
        false
    }

    /// Record PASS when `ok`, FAIL otherwise
    fn check(&mut self, ok: bool, text: impl Into<String>) -> Status
    where
        Self: Sized,
    {
        self.checks().record(Status::from_bool(ok), text, None, false)
    }

    fn add(&mut self, status: Status, text: impl Into<String>, details: Option<String>) -> Status
    where
        Self: Sized,
    {
        self.checks().record(status, text, details, false)
    }

    /// Run `body` in a contained block of the given kind
    fn block<F>(&mut self, kind: BlockKind, text: &str, body: F) -> Status
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> anyhow::Result<()>,
    {
        contained(self, kind, text, body)
    }

    fn all<F>(&mut self, body: F) -> Status
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> anyhow::Result<()>,
    {
        self.block(BlockKind::All, BlockKind::All.default_text(), body)
    }

    fn any<F>(&mut self, body: F) -> Status
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> anyhow::Result<()>,
    {
        self.block(BlockKind::Any, BlockKind::Any.default_text(), body)
    }

    fn not_all<F>(&mut self, body: F) -> Status
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> anyhow::Result<()>,
    {
        self.block(BlockKind::NotAll, BlockKind::NotAll.default_text(), body)
    }

    fn not_any<F>(&mut self, body: F) -> Status
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> anyhow::Result<()>,
    {
        self.block(BlockKind::NotAny, BlockKind::NotAny.default_text(), body)
    }
}

impl Recorder for CheckStack {
    fn checks(&mut self) -> &mut CheckStack {
        self
    }
}

/// Run `body` inside a nested block that never lets a failure escape.
///
/// An `Err` or a panic from the body forces this block to FAIL; sibling blocks
/// and the enclosing tree are unaffected.
pub fn contained<T, F, E>(target: &mut T, kind: BlockKind, text: &str, body: F) -> Status
where
    T: Recorder + ?Sized,
    F: FnOnce(&mut T) -> std::result::Result<(), E>,
    E: Into<anyhow::Error>,
{
    let debug = target.debug();
    let handle = target.checks().begin(kind, text, false);
    let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut *target)));
    match failure_message(text, outcome) {
        None => target.checks().end(handle),
        Some(message) => {
            if debug {
                log::error!(
                    "contained failure in '{}': {}\n{}",
                    text,
                    message,
                    std::backtrace::Backtrace::force_capture()
                );
            }
            target
                .checks()
                .end_failed(handle, format!("internal error: {}", message))
        }
    }
}

/// Describe an `Err` or a panic from a guarded body; `None` on success
pub(crate) fn failure_message<E: Into<anyhow::Error>>(
    text: &str,
    outcome: std::thread::Result<std::result::Result<(), E>>,
) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => {
            let err: anyhow::Error = err.into();
            log::warn!("check block '{}' failed: {:#}", text, err);
            Some(format!("{:#}", err))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::warn!("check block '{}' panicked: {}", text, message);
            Some(message)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
