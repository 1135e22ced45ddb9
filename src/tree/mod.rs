//! Parse trees
//!
//! Parsers outside this crate emit JSON; it is loaded into an arena where every
//! node is addressed by a [`ValueId`]. Identity is the id, never structural equality.

pub mod forest;

pub use forest::{
    parse_tree_json, release_tree_json, Forest, SourceRange, Value, ValueId, ValueKind, RANGE_KEY,
};
