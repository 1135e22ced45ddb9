/// Arena of parse-tree values
use crate::config::types::{GradeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number};

/// Reserved JSON key carrying a node's source range
pub const RANGE_KEY: &str = "_range";

/// Index of a value inside a [`Forest`]; this is the node identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueId(u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Source byte range of a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ValueId>),
    Dict {
        entries: Vec<(String, ValueId)>,
        range: Option<SourceRange>,
    },
}

/// Shape of a value, for diagnostics and dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Dict,
}

/// Immutable-once-built store of parse-tree values.
///
/// Values are only ever appended; a `ValueId` stays valid for the forest's lifetime.
#[derive(Clone, Debug, Default)]
pub struct Forest {
    values: Vec<Value>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value and return its id
    pub fn add(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(value);
        id
    }

    /// Load a JSON parse tree; objects may carry a `_range` of `{start, end, file?}`.
    ///
    /// Children get their ids before their parent. The walk keeps its own
    /// stack, so the depth of the tree is not limited by the thread stack.
    pub fn load_json(&mut self, json: &serde_json::Value) -> Result<ValueId> {
        let mut work = vec![Pending::Visit(json)];
        let mut done: Vec<ValueId> = Vec::new();
        while let Some(next) = work.pop() {
            match next {
                Pending::Visit(json) => match json {
                    serde_json::Value::Null => done.push(self.add(Value::Null)),
                    serde_json::Value::Bool(b) => done.push(self.add(Value::Bool(*b))),
                    serde_json::Value::Number(n) => {
                        let value = match n.as_i64() {
                            Some(i) => Value::Int(i),
                            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
                        };
                        done.push(self.add(value));
                    }
                    serde_json::Value::String(s) => done.push(self.add(Value::Str(s.clone()))),
                    serde_json::Value::Array(items) => {
                        work.push(Pending::List(items.len()));
                        work.extend(items.iter().rev().map(Pending::Visit));
                    }
                    serde_json::Value::Object(map) => {
                        let mut keys = Vec::with_capacity(map.len());
                        let mut children = Vec::with_capacity(map.len());
                        let mut range = None;
                        for (key, item) in map {
                            if key == RANGE_KEY {
                                range = Some(parse_range(item)?);
                            } else {
                                keys.push(key.clone());
                                children.push(item);
                            }
                        }
                        work.push(Pending::Dict { keys, range });
                        work.extend(children.into_iter().rev().map(Pending::Visit));
                    }
                },
                Pending::List(len) => {
                    let ids = done.split_off(done.len() - len);
                    done.push(self.add(Value::List(ids)));
                }
                Pending::Dict { keys, range } => {
                    let ids = done.split_off(done.len() - keys.len());
                    let entries = keys.into_iter().zip(ids).collect();
                    done.push(self.add(Value::Dict { entries, range }));
                }
            }
        }
        done.pop()
            .ok_or_else(|| GradeError::ParseTree("empty parse tree".to_string()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn kind_of(&self, id: ValueId) -> ValueKind {
        match self.value(id) {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Dict { .. } => ValueKind::Dict,
        }
    }

    /// The node kind, i.e. the string under the `kind` field of a dict
    pub fn kind(&self, id: ValueId) -> Option<&str> {
        self.field(id, "kind").and_then(|kind| self.as_str(kind))
    }

    /// Named field of a dict
    pub fn field(&self, id: ValueId, name: &str) -> Option<ValueId> {
        match self.value(id) {
            Value::Dict { entries, .. } => entries
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| *value),
            _ => None,
        }
    }

    /// Entries of a dict (empty for anything else)
    pub fn entries(&self, id: ValueId) -> &[(String, ValueId)] {
        match self.value(id) {
            Value::Dict { entries, .. } => entries,
            _ => &[],
        }
    }

    /// Direct sub-values: list elements or dict values
    pub fn children(&self, id: ValueId) -> Vec<ValueId> {
        match self.value(id) {
            Value::List(items) => items.clone(),
            Value::Dict { entries, .. } => entries.iter().map(|(_, value)| *value).collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_str(&self, id: ValueId) -> Option<&str> {
        match self.value(id) {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn range(&self, id: ValueId) -> Option<&SourceRange> {
        match self.value(id) {
            Value::Dict { range, .. } => range.as_ref(),
            _ => None,
        }
    }

    /// Source text covered by a node's range
    pub fn text<'s>(&self, id: ValueId, source: &'s str) -> Option<&'s str> {
        let range = self.range(id)?;
        source.get(range.start..range.end)
    }

    /// Element count of a list or entry count of a dict
    pub fn len_of(&self, id: ValueId) -> usize {
        match self.value(id) {
            Value::List(items) => items.len(),
            Value::Dict { entries, .. } => entries.len(),
            _ => 0,
        }
    }

    /// Re-export a value as JSON, ranges included as `_range`
    pub fn to_json(&self, id: ValueId) -> serde_json::Value {
        match self.value(id) {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|item| self.to_json(*item)).collect())
            }
            Value::Dict { entries, range } => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.to_json(*value));
                }
                if let Some(range) = range {
                    map.insert(
                        RANGE_KEY.to_string(),
                        serde_json::to_value(range).unwrap_or(serde_json::Value::Null),
                    );
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Deferred step of [`Forest::load_json`]
enum Pending<'j> {
    Visit(&'j serde_json::Value),
    /// Collect the last `n` finished ids into a list
    List(usize),
    /// Collect the last `keys.len()` finished ids into a dict
    Dict {
        keys: Vec<String>,
        range: Option<SourceRange>,
    },
}

/// Deserialize a parse-tree dump of any nesting depth.
///
/// Parser dumps nest one level per syntax node, far past the default
/// recursion limit of `serde_json`; the stack is grown on demand instead.
pub fn parse_tree_json(bytes: &[u8]) -> Result<serde_json::Value> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    deserializer.disable_recursion_limit();
    let value = serde_json::Value::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
    deserializer.end()?;
    Ok(value)
}

/// Drop a parsed dump level by level instead of through nested destructors
pub fn release_tree_json(json: serde_json::Value) {
    let mut pending = vec![json];
    while let Some(mut value) = pending.pop() {
        match &mut value {
            serde_json::Value::Array(items) => pending.append(items),
            serde_json::Value::Object(map) => {
                pending.extend(std::mem::take(map).into_iter().map(|(_, item)| item));
            }
            _ => {}
        }
    }
}

fn parse_range(json: &serde_json::Value) -> Result<SourceRange> {
    let range: SourceRange = serde_json::from_value(json.clone())
        .map_err(|e| GradeError::ParseTree(format!("invalid {}: {}", RANGE_KEY, e)))?;
    if range.start > range.end {
        return Err(GradeError::ParseTree(format!(
            "invalid {}: start {} after end {}",
            RANGE_KEY, range.start, range.end
        )));
    }
    Ok(range)
}
