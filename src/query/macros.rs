/// `{Name}` placeholder expansion for query texts
use crate::config::types::{GradeError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Macro name to the concrete node kinds it stands for
pub type MacroTable = BTreeMap<String, Vec<String>>;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    })
}

/// Expand every placeholder, yielding one query per combination of choices.
///
/// Combinations follow placeholder order in the text and choice order in the table.
pub fn expand(query: &str, table: &MacroTable) -> Result<Vec<String>> {
    let mut names: Vec<&str> = Vec::new();
    for capture in placeholder().captures_iter(query) {
        let name = capture.get(1).map_or("", |m| m.as_str());
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut choices: Vec<&[String]> = Vec::with_capacity(names.len());
    for name in &names {
        let kinds = table
            .get(*name)
            .ok_or_else(|| GradeError::Pattern(format!("unknown macro {{{}}}", name)))?;
        choices.push(kinds);
    }

    let mut expanded = Vec::new();
    let mut picks = vec![0usize; names.len()];
    if choices.iter().any(|kinds| kinds.is_empty()) {
        return Ok(expanded);
    }
    loop {
        let text = placeholder().replace_all(query, |caps: &regex::Captures| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            names
                .iter()
                .position(|n| *n == name)
                .map(|slot| choices[slot][picks[slot]].clone())
                .unwrap_or_default()
        });
        expanded.push(text.into_owned());

        // odometer over the choice lists, last placeholder fastest
        let mut slot = names.len();
        loop {
            if slot == 0 {
                return Ok(expanded);
            }
            slot -= 1;
            picks[slot] += 1;
            if picks[slot] < choices[slot].len() {
                break;
            }
            picks[slot] = 0;
        }
    }
}
