/// Structural matching of patterns against forest values
use crate::query::pattern::{Count, DictPattern, Pattern};
use crate::tree::{Forest, Value, ValueId};

/// Match `pattern` against `item`; `None` stands for a missing dict field.
pub fn matches(forest: &Forest, pattern: &Pattern, item: Option<ValueId>) -> bool {
    match pattern {
        Pattern::Const(b) => *b,
        Pattern::And(patterns) => patterns.iter().all(|p| matches(forest, p, item)),
        Pattern::Or(patterns) => patterns.iter().any(|p| matches(forest, p, item)),
        Pattern::Not(inner) => !matches(forest, inner, item),
        Pattern::Ellipsis => item.is_some_and(|id| !matches!(forest.value(id), Value::Null)),
        Pattern::Null => item.map_or(true, |id| matches!(forest.value(id), Value::Null)),
        _ => match item {
            Some(id) => matches_value(forest, pattern, id),
            None => false,
        },
    }
}

fn matches_value(forest: &Forest, pattern: &Pattern, id: ValueId) -> bool {
    match (pattern, forest.value(id)) {
        (Pattern::Str(key), Value::Dict { .. }) => forest.field(id, key).is_some(),
        (Pattern::Dict(dict), Value::Dict { entries, .. }) => {
            matches_dict(forest, dict, id, entries.len())
        }
        (Pattern::List(patterns), Value::List(items)) => matches_list(forest, patterns, items),
        (Pattern::Int(n), Value::List(items)) => *n >= 0 && items.len() == *n as usize,
        (Pattern::Len(count), Value::List(items)) => count.admits(items.len()),
        (Pattern::Str(expected), Value::Str(actual)) => expected == actual,
        (Pattern::Int(expected), Value::Int(actual)) => expected == actual,
        (Pattern::Int(expected), Value::Float(actual)) => (*expected as f64) == *actual,
        (Pattern::Float(expected), Value::Float(actual)) => expected == actual,
        (Pattern::Float(expected), Value::Int(actual)) => *expected == (*actual as f64),
        _ => false,
    }
}

fn matches_dict(forest: &Forest, dict: &DictPattern, id: ValueId, item_len: usize) -> bool {
    let fields_match = dict
        .fields
        .iter()
        .all(|(key, sub)| matches(forest, sub, forest.field(id, key)));
    if !fields_match {
        return false;
    }
    match &dict.extra {
        None | Some(Count::Any) => true,
        Some(count) => match item_len.checked_sub(dict.fields.len()) {
            Some(extra) => count.admits(extra),
            None => false,
        },
    }
}

fn matches_list(forest: &Forest, patterns: &[Pattern], items: &[ValueId]) -> bool {
    let (head, tail) = match patterns.iter().position(|p| matches!(p, Pattern::Ellipsis)) {
        Some(split) => (&patterns[..split], &patterns[split + 1..]),
        None if patterns.len() != items.len() => return false,
        None => (patterns, &[][..]),
    };
    if items.len() < head.len() + tail.len() {
        return false;
    }
    let head_ok = head
        .iter()
        .zip(items.iter())
        .all(|(p, item)| matches(forest, p, Some(*item)));
    head_ok
        && tail
            .iter()
            .rev()
            .zip(items.iter().rev())
            .all(|(p, item)| matches(forest, p, Some(*item)))
}
