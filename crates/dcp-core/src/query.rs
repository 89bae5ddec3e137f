//! # Typed Query Builder
//!
//! [`QuerySpec`] filters, sorts and pages entities by dotted field paths
//! over their serialized (camelCase JSON) form. All criteria must hold
//! (logical AND). Queries are read-only and never touch lease state.
//!
//! ## Operator semantics
//!
//! | Operator | Matches when |
//! |---|---|
//! | `Eq` / `Ne` | the field equals / differs from the value; numbers and strings compare by string form when their JSON types differ |
//! | `In` | the value is an array containing the field value |
//! | `Contains` | the field is an array containing the value, or a string containing it as a substring |
//! | `Like` / `Ilike` | SQL `LIKE` pattern (`%` any run, `_` one char); `Ilike` ignores case |
//! | `Lt` `Le` `Gt` `Ge` | numeric comparison for numbers, lexicographic for strings (RFC 3339 timestamps order correctly) |
//!
//! A path that crosses an array fans out over its elements; the criterion
//! holds if any reached value satisfies it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a [`Criterion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    In,
    Contains,
    Like,
    Ilike,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One filter condition: `field operator value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Criterion {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// Whether `item` satisfies this criterion.
    pub fn matches(&self, item: &Value) -> bool {
        let mut found = Vec::new();
        collect_path(item, &self.field.split('.').collect::<Vec<_>>(), &mut found);

        match self.operator {
            // A missing field differs from every value.
            Operator::Ne => found.iter().all(|v| !loosely_equal(v, &self.value)),
            _ => found.iter().any(|v| self.test(v)),
        }
    }

    fn test(&self, actual: &Value) -> bool {
        match self.operator {
            Operator::Eq => loosely_equal(actual, &self.value),
            Operator::Ne => !loosely_equal(actual, &self.value),
            Operator::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| loosely_equal(actual, o)),
                other => loosely_equal(actual, other),
            },
            Operator::Contains => match actual {
                Value::Array(items) => items.iter().any(|i| loosely_equal(i, &self.value)),
                Value::String(s) => s.contains(string_form(&self.value).as_str()),
                _ => false,
            },
            Operator::Like => like(&string_form(actual), &string_form(&self.value), false),
            Operator::Ilike => like(&string_form(actual), &string_form(&self.value), true),
            Operator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            Operator::Le => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter, sort and paging over entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub filter: Vec<Criterion>,
    pub sort_field: Option<String>,
    pub sort_order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, criterion: Criterion) -> Self {
        self.filter.push(criterion);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.sort_order = order;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a serialized entity passes every criterion.
    pub fn matches(&self, item: &Value) -> bool {
        self.filter.iter().all(|c| c.matches(item))
    }

    /// Apply filter, sort, offset and limit to serialized entities.
    ///
    /// Items keep their input order when no sort field is set, and ties
    /// keep their relative order when one is.
    pub fn apply<T>(&self, items: Vec<(Value, T)>) -> Vec<T> {
        let mut selected: Vec<(Value, T)> =
            items.into_iter().filter(|(v, _)| self.matches(v)).collect();

        if let Some(field) = &self.sort_field {
            let path: Vec<&str> = field.split('.').collect();
            selected.sort_by(|(a, _), (b, _)| {
                let ka = first_at_path(a, &path);
                let kb = first_at_path(b, &path);
                let ord = match (ka, kb) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match self.sort_order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }

        selected
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|(_, t)| t)
            .collect()
    }
}

// ---- Path and comparison helpers ----

fn collect_path<'a>(value: &'a Value, path: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, tail)) = path.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect_path(child, tail, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_path(item, path, out);
            }
        }
        _ => {}
    }
}

fn first_at_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut found = Vec::new();
    collect_path(value, path, &mut found);
    found.into_iter().find(|v| !v.is_null())
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            string_form(a) == string_form(b)
        }
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// SQL `LIKE` matching: `%` matches any run of characters, `_` exactly one.
fn like(text: &str, pattern: &str, ignore_case: bool) -> bool {
    let (text, pattern) = if ignore_case {
        (text.to_lowercase(), pattern.to_lowercase())
    } else {
        (text.to_string(), pattern.to_string())
    };
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();

    // Iterative wildcard matching with single-star backtracking.
    let (mut ti, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}
