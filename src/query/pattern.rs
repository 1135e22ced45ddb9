/// Query patterns and their JSON syntax
use crate::config::types::{GradeError, Result};
use serde_json::Value as Json;

/// The wildcard marker: matches anything present, splits list patterns
pub const ELLIPSIS: &str = "...";

/// Constraint on a count (list length, or number of extra dict fields)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Count {
    Exact(usize),
    /// Half-open `start..end`
    Range { start: usize, end: usize },
    AtLeast(usize),
    Any,
}

impl Count {
    pub fn admits(&self, n: usize) -> bool {
        match *self {
            Count::Exact(expected) => n == expected,
            Count::Range { start, end } => (start..end).contains(&n),
            Count::AtLeast(start) => n >= start,
            Count::Any => true,
        }
    }

    /// `null` → exactly 0, `"..."` → any, `n`, `[a, b]`, `[a, null]`
    fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Null => Ok(Count::Exact(0)),
            Json::String(s) if s == ELLIPSIS => Ok(Count::Any),
            Json::Number(n) => n
                .as_u64()
                .map(|n| Count::Exact(n as usize))
                .ok_or_else(|| invalid_count(json)),
            Json::Array(bounds) if bounds.len() == 2 => {
                let start = bounds[0].as_u64().ok_or_else(|| invalid_count(json))? as usize;
                match &bounds[1] {
                    Json::Null => Ok(Count::AtLeast(start)),
                    end => {
                        let end = end.as_u64().ok_or_else(|| invalid_count(json))? as usize;
                        Ok(Count::Range { start, end })
                    }
                }
            }
            _ => Err(invalid_count(json)),
        }
    }

    fn to_json(&self) -> Json {
        match *self {
            Count::Exact(n) => Json::from(n),
            Count::Range { start, end } => Json::from(vec![start, end]),
            Count::AtLeast(start) => Json::Array(vec![Json::from(start), Json::Null]),
            Count::Any => Json::from(ELLIPSIS),
        }
    }
}

fn invalid_count(json: &Json) -> GradeError {
    GradeError::Pattern(format!("invalid selector for key '{}': {}", ELLIPSIS, json))
}

#[derive(Clone, Debug, PartialEq)]
pub struct DictPattern {
    pub fields: Vec<(String, Pattern)>,
    /// Constraint on the number of item fields beyond `fields`
    pub extra: Option<Count>,
}

/// Declarative description of the values a query selects
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    /// `true` selects everything, `false` nothing
    Const(bool),
    Ellipsis,
    Null,
    /// Field name against dicts, equality otherwise
    Str(String),
    /// Length against lists, numeric equality otherwise
    Int(i64),
    Float(f64),
    Len(Count),
    Dict(DictPattern),
    List(Vec<Pattern>),
    And(Vec<Pattern>),
    Or(Vec<Pattern>),
    Not(Box<Pattern>),
}

impl Pattern {
    /// Parse a pattern from JSON text
    pub fn parse(text: &str) -> Result<Self> {
        let json: Json = serde_json::from_str(text)
            .map_err(|e| GradeError::Pattern(format!("invalid pattern JSON: {}", e)))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Bool(b) => Ok(Pattern::Const(*b)),
            Json::Null => Ok(Pattern::Null),
            Json::String(s) if s == ELLIPSIS => Ok(Pattern::Ellipsis),
            Json::String(s) => Ok(Pattern::Str(s.clone())),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Pattern::Int(i)),
                None => Ok(Pattern::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Json::Array(items) => {
                let patterns = items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>>>()?;
                let markers = patterns
                    .iter()
                    .filter(|p| matches!(p, Pattern::Ellipsis))
                    .count();
                if markers > 1 {
                    return Err(GradeError::Pattern(format!(
                        "list pattern has {} '{}' markers, at most one allowed",
                        markers, ELLIPSIS
                    )));
                }
                Ok(Pattern::List(patterns))
            }
            Json::Object(map) => {
                if map.len() == 1 {
                    if let Some((key, value)) = map.iter().next() {
                        match key.as_str() {
                            "$and" => return Ok(Pattern::And(Self::combinator_args(key, value)?)),
                            "$or" => return Ok(Pattern::Or(Self::combinator_args(key, value)?)),
                            "$not" => return Ok(Pattern::Not(Box::new(Self::from_json(value)?))),
                            "$len" => return Ok(Pattern::Len(Count::from_json(value)?)),
                            _ => {}
                        }
                    }
                }
                let mut fields = Vec::with_capacity(map.len());
                let mut extra = None;
                for (key, value) in map {
                    if key == ELLIPSIS {
                        extra = Some(Count::from_json(value)?);
                    } else {
                        fields.push((key.clone(), Self::from_json(value)?));
                    }
                }
                Ok(Pattern::Dict(DictPattern { fields, extra }))
            }
        }
    }

    fn combinator_args(key: &str, value: &Json) -> Result<Vec<Pattern>> {
        match value {
            Json::Array(items) if !items.is_empty() => items.iter().map(Self::from_json).collect(),
            _ => Err(GradeError::Pattern(format!(
                "{} expects a non-empty array of patterns, got {}",
                key, value
            ))),
        }
    }

    /// Serialise back to the JSON syntax accepted by [`Pattern::from_json`]
    pub fn to_json(&self) -> Json {
        match self {
            Pattern::Const(b) => Json::Bool(*b),
            Pattern::Ellipsis => Json::from(ELLIPSIS),
            Pattern::Null => Json::Null,
            Pattern::Str(s) => Json::from(s.as_str()),
            Pattern::Int(i) => Json::from(*i),
            Pattern::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Pattern::Len(count) => serde_json::json!({ "$len": count.to_json() }),
            Pattern::Dict(dict) => {
                let mut map = serde_json::Map::new();
                for (key, pattern) in &dict.fields {
                    map.insert(key.clone(), pattern.to_json());
                }
                if let Some(extra) = &dict.extra {
                    let value = match extra {
                        Count::Exact(0) => Json::Null,
                        other => other.to_json(),
                    };
                    map.insert(ELLIPSIS.to_string(), value);
                }
                Json::Object(map)
            }
            Pattern::List(items) => Json::Array(items.iter().map(Pattern::to_json).collect()),
            Pattern::And(items) => {
                serde_json::json!({ "$and": items.iter().map(Pattern::to_json).collect::<Vec<_>>() })
            }
            Pattern::Or(items) => {
                serde_json::json!({ "$or": items.iter().map(Pattern::to_json).collect::<Vec<_>>() })
            }
            Pattern::Not(inner) => serde_json::json!({ "$not": inner.to_json() }),
        }
    }
}
