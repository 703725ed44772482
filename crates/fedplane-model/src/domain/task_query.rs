use std::cmp::Ordering;

use serde_json::Value;

/// Upper bound applied to a listing when the caller leaves `limit` at `0`.
pub const DEFAULT_TASK_LIST_LENGTH: usize = 1000;

/// Filter tree evaluated against a stored document.
///
/// Field names are document keys (`taskType`, `taskIndex`, `status`, ...).
/// Dotted names address nested objects (`commonParams.clusterId`).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    /// Matches every document.
    pub fn all() -> Self {
        Condition::And(Vec::new())
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Ne(field.into(), value.into())
    }

    pub fn is_in<V, I>(field: impl Into<String>, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Condition::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut items) => {
                items.push(other);
                Condition::And(items)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Condition::Eq(field, expected) => lookup(doc, field) == Some(expected),
            Condition::Ne(field, expected) => lookup(doc, field) != Some(expected),
            Condition::In(field, values) => {
                lookup(doc, field).is_some_and(|actual| values.contains(actual))
            }
            Condition::And(items) => items.iter().all(|c| c.matches(doc)),
            Condition::Or(items) => items.iter().any(|c| c.matches(doc)),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::all()
    }
}

/// Resolve a possibly dotted field name inside a JSON document.
pub(crate) fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(doc, |node, segment| node.as_object()?.get(segment))
}

/// Sort direction, persisted as `1` / `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn from_sign(sign: i32) -> Self {
        if sign < 0 { SortOrder::Desc } else { SortOrder::Asc }
    }
}

/// Listing options: sort, pagination and read-out flags.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Applied left to right; later keys break ties of earlier ones.
    pub sort: Vec<(String, SortOrder)>,
    pub offset: usize,
    /// `0` means [`DEFAULT_TASK_LIST_LENGTH`].
    pub limit: usize,
    /// Ignore `offset` and read from the first match. The limit still applies.
    pub all: bool,
    /// Only compute `total`; `items` stays empty.
    pub count: bool,
    /// Return sensitive parameters in masked form.
    pub skip_decrypt: bool,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_all(mut self) -> Self {
        self.all = true;
        self
    }

    pub fn count_only(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn with_skip_decrypt(mut self) -> Self {
        self.skip_decrypt = true;
        self
    }

    /// Number of items a listing may return.
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_TASK_LIST_LENGTH
        } else {
            self.limit
        }
    }

    pub fn effective_offset(&self) -> usize {
        if self.all { 0 } else { self.offset }
    }

    /// Compare two documents according to `sort`.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (field, order) in &self.sort {
            let ord = compare_values(lookup(a, field), lookup(b, field));
            let ord = match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Result of a paginated listing.
#[derive(Debug, Clone)]
pub struct TaskPage<T> {
    pub items: Vec<T>,
    /// Matches after filtering, before pagination.
    pub total: usize,
}

impl<T> TaskPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}
