//! Check tree and status algebra
//!
//! A submission's evaluation records leaf checks into nested blocks. Each block
//! reduces its children with [`BlockKind::reduce`] when it ends, and a failure
//! inside a block run through [`contained`] fails that block only.

pub mod recorder;
pub mod status;
pub mod tree;

pub use recorder::{contained, BlockHandle, CheckStack, Recorder};
pub use status::{BlockKind, Status};
pub use tree::Check;

/// Quote user-facing text for check descriptions: one line, bounded length
pub fn describe(text: &str) -> String {
    const MAX: usize = 60;
    let flat: String = text
        .chars()
        .flat_map(|c| match c {
            '\n' => vec!['\\', 'n'],
            '\t' => vec!['\\', 't'],
            '`' => vec!['\''],
            c => vec![c],
        })
        .collect();
    if flat.chars().count() > MAX {
        let cut: String = flat.chars().take(MAX - 3).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
