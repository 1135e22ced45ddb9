//! Tree query engine
//!
//! Patterns are JSON documents matched structurally against forest values:
//!
//! - `true` / `false` select everything / nothing, `"..."` anything present
//! - a string selects dicts having that field, a dict matches field by field,
//!   with the reserved `"..."` key constraining the number of extra fields
//! - a list matches element-wise, one `"..."` element splits it into head and tail
//! - an integer or `{"$len": ...}` matches lists by length
//! - `{"$and": [...]}`, `{"$or": [...]}`, `{"$not": p}` combine patterns
//!
//! [`QueryResult`] chains selection (`select`, `match_any`) and descent
//! (`children`, `descendants`) steps, and keeps pinned ancestors alive across them.

pub mod macros;
pub mod matcher;
pub mod pattern;
pub mod result;

pub use macros::{expand, MacroTable};
pub use matcher::matches;
pub use pattern::{Count, DictPattern, Pattern, ELLIPSIS};
pub use result::{Pin, QueryResult};

use crate::config::types::Result;
use crate::tree::{Forest, ValueId};

/// Expand `text`, parse every expansion and concatenate the descendant matches over `roots`
pub fn run<'f>(
    forest: &'f Forest,
    roots: &[ValueId],
    text: &str,
    macros: &MacroTable,
) -> Result<QueryResult<'f>> {
    let base = QueryResult::new(forest, roots.iter().copied());
    let mut found = Vec::new();
    for expansion in expand(text, macros)? {
        let pattern = Pattern::parse(&expansion)?;
        log::trace!("query {}", expansion);
        found.extend(base.descendants(&pattern).iter());
    }
    Ok(QueryResult::new(forest, found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_expands_macros() {
        let mut forest = Forest::new();
        let root = forest
            .load_json(&json!({
                "kind": "translation_unit",
                "children": [
                    {"kind": "for_statement"},
                    {"kind": "while_statement"},
                    {"kind": "if_statement"}
                ]
            }))
            .unwrap();
        let mut table = MacroTable::new();
        table.insert(
            "Loop".to_string(),
            vec!["for_statement".to_string(), "while_statement".to_string()],
        );
        let found = run(&forest, &[root], r#"{"kind": "{Loop}"}"#, &table).unwrap();
        assert_eq!(found.len(), 2);
        assert!(run(&forest, &[root], "{not json", &table).is_err());
    }
}
