/// Query results: ordered matches plus named pins
use crate::config::types::{GradeError, Result};
use crate::query::matcher::matches;
use crate::query::pattern::Pattern;
use crate::tree::{Forest, Value, ValueId};
use std::collections::{BTreeMap, HashSet};

/// A pinned item with the live sub-result filtered alongside its parent
pub type Pin<'f> = (ValueId, QueryResult<'f>);

#[derive(Clone, Copy, Debug)]
enum Step {
    Select,
    MatchAny,
    Children,
    Descendants,
}

/// Ordered bag of matched values (duplicates kept for counting) and pins.
///
/// Every step applied to a result is also applied to the sub-result of each pin;
/// pinned items whose sub-result becomes empty are dropped.
#[derive(Clone, Debug)]
pub struct QueryResult<'f> {
    forest: &'f Forest,
    items: Vec<ValueId>,
    pins: BTreeMap<String, Vec<Pin<'f>>>,
}

impl<'f> QueryResult<'f> {
    pub fn new(forest: &'f Forest, items: impl IntoIterator<Item = ValueId>) -> Self {
        Self {
            forest,
            items: items.into_iter().collect(),
            pins: BTreeMap::new(),
        }
    }

    pub fn forest(&self) -> &'f Forest {
        self.forest
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.items.iter().copied()
    }

    pub fn items(&self) -> &[ValueId] {
        &self.items
    }

    pub fn pins(&self) -> &BTreeMap<String, Vec<Pin<'f>>> {
        &self.pins
    }

    /// Items that match `pattern`
    pub fn select(&self, pattern: &Pattern) -> Self {
        self.apply(Step::Select, pattern)
    }

    /// Items that match `pattern` or have a descendant that does
    pub fn match_any(&self, pattern: &Pattern) -> Self {
        self.apply(Step::MatchAny, pattern)
    }

    /// Children of the items that match `pattern`
    pub fn children(&self, pattern: &Pattern) -> Self {
        self.apply(Step::Children, pattern)
    }

    /// Descendants of the items that match `pattern`
    pub fn descendants(&self, pattern: &Pattern) -> Self {
        self.apply(Step::Descendants, pattern)
    }

    /// Pin the current items under `name`
    pub fn pin(mut self, name: &str) -> Self {
        let pinned = self
            .items
            .iter()
            .map(|item| (*item, QueryResult::new(self.forest, [*item])))
            .collect();
        self.pins.insert(name.to_string(), pinned);
        self
    }

    /// Pinned items under `name` that still have surviving matches
    pub fn unpin(&self, name: &str) -> Self {
        let items = self
            .pins
            .get(name)
            .map(|pinned| {
                pinned
                    .iter()
                    .filter(|(_, sub)| !sub.is_empty())
                    .map(|(item, _)| *item)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        QueryResult::new(self.forest, items)
    }

    /// Items of `self`, then items of `other` not already in `self`
    pub fn union(&self, other: &Self) -> Result<Self> {
        self.ensure_unpinned(other)?;
        let left: HashSet<ValueId> = self.items.iter().copied().collect();
        let items = self
            .iter()
            .chain(other.iter().filter(|item| !left.contains(item)));
        Ok(QueryResult::new(self.forest, items.collect::<Vec<_>>()))
    }

    /// Items of `self` also in `other`
    pub fn intersect(&self, other: &Self) -> Result<Self> {
        self.ensure_unpinned(other)?;
        let right: HashSet<ValueId> = other.items.iter().copied().collect();
        Ok(QueryResult::new(
            self.forest,
            self.iter().filter(|item| right.contains(item)).collect::<Vec<_>>(),
        ))
    }

    /// Items of `self` not in `other`
    pub fn difference(&self, other: &Self) -> Result<Self> {
        self.ensure_unpinned(other)?;
        let right: HashSet<ValueId> = other.items.iter().copied().collect();
        Ok(QueryResult::new(
            self.forest,
            self.iter().filter(|item| !right.contains(item)).collect::<Vec<_>>(),
        ))
    }

    fn ensure_unpinned(&self, other: &Self) -> Result<()> {
        let names: Vec<&str> = self
            .pins
            .keys()
            .chain(other.pins.keys())
            .map(String::as_str)
            .collect();
        if names.is_empty() {
            Ok(())
        } else {
            Err(GradeError::PinnedSetOperation(names.join(", ")))
        }
    }

    /// JSON view: `{"matches": [...], "pins": {name: [...]}}`
    pub fn to_json(&self) -> serde_json::Value {
        let matches: Vec<_> = self.iter().map(|id| self.forest.to_json(id)).collect();
        let pins: serde_json::Map<String, serde_json::Value> = self
            .pins
            .keys()
            .map(|name| {
                let items = self.unpin(name).iter().map(|id| self.forest.to_json(id)).collect();
                (name.clone(), serde_json::Value::Array(items))
            })
            .collect();
        serde_json::json!({ "matches": matches, "pins": pins })
    }

    fn apply(&self, step: Step, pattern: &Pattern) -> Self {
        let mut items = Vec::new();
        for item in self.iter() {
            match step {
                Step::Select => {
                    if matches(self.forest, pattern, Some(item)) {
                        items.push(item);
                    }
                }
                Step::MatchAny => {
                    if matches(self.forest, pattern, Some(item))
                        || has_descendant(self.forest, item, pattern)
                    {
                        items.push(item);
                    }
                }
                Step::Children => items.extend(child_matches(self.forest, item, pattern)),
                Step::Descendants => collect_descendants(self.forest, item, pattern, &mut items),
            }
        }
        QueryResult {
            forest: self.forest,
            items,
            pins: self.pinned(step, pattern),
        }
    }

    fn pinned(&self, step: Step, pattern: &Pattern) -> BTreeMap<String, Vec<Pin<'f>>> {
        self.pins
            .iter()
            .filter_map(|(name, old)| {
                let kept: Vec<Pin<'f>> = old
                    .iter()
                    .map(|(item, sub)| (*item, sub.apply(step, pattern)))
                    .filter(|(_, sub)| !sub.is_empty())
                    .collect();
                (!kept.is_empty()).then(|| (name.clone(), kept))
            })
            .collect()
    }
}

/// Children of one value selected by `pattern`
fn child_matches(forest: &Forest, item: ValueId, pattern: &Pattern) -> Vec<ValueId> {
    match forest.value(item) {
        Value::Dict { entries, .. } => match pattern {
            Pattern::Str(key) => forest.field(item, key).into_iter().collect(),
            Pattern::Ellipsis => entries.iter().map(|(_, value)| *value).collect(),
            _ => entries
                .iter()
                .map(|(_, value)| *value)
                .filter(|value| matches(forest, pattern, Some(*value)))
                .collect(),
        },
        Value::List(elements) => elements
            .iter()
            .copied()
            .filter(|element| matches(forest, pattern, Some(*element)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Pre-order walk below `item`, with an explicit stack
fn walk_below(forest: &Forest, item: ValueId, mut visit: impl FnMut(ValueId) -> bool) {
    let mut stack = vec![item];
    while let Some(id) = stack.pop() {
        if !visit(id) {
            return;
        }
        let mut children = forest.children(id);
        children.reverse();
        stack.extend(children);
    }
}

fn collect_descendants(forest: &Forest, item: ValueId, pattern: &Pattern, out: &mut Vec<ValueId>) {
    walk_below(forest, item, |id| {
        out.extend(child_matches(forest, id, pattern));
        true
    });
}

fn has_descendant(forest: &Forest, item: ValueId, pattern: &Pattern) -> bool {
    let mut found = false;
    walk_below(forest, item, |id| {
        found = !child_matches(forest, id, pattern).is_empty();
        !found
    });
    found
}
