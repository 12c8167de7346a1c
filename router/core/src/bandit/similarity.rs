//! Context similarity between an arm's metadata and a caller context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One metadata value: a scalar or a list of scalars
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Boolean flag
    Bool(bool),
    /// Numeric feature, compared by normalized closeness
    Number(f64),
    /// Text label, compared exactly
    Text(String),
    /// List, compared by overlap
    List(Vec<MetaValue>),
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Typed key-value metadata; ordered so persisted state is stable
pub type Meta = BTreeMap<String, MetaValue>;

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}

/// Score one metadata field against the context value
fn field_similarity(arm: &MetaValue, ctx: &MetaValue) -> f64 {
    match (arm, ctx) {
        (MetaValue::Number(a), MetaValue::Number(c)) => {
            let scale = a.max(*c).max(1.0);
            (1.0 - ((a - c).abs() / scale).min(1.0)).max(0.0)
        }
        _ if arm == ctx => 1.0,
        (MetaValue::List(a), MetaValue::List(c)) => {
            let shared = a.iter().filter(|x| c.contains(x)).count();
            ratio(shared, a.len().max(1))
        }
        _ => 0.0,
    }
}

/// Similarity in `[0, 1]` between an arm's metadata and a context
///
/// Every arm field counts toward the average; fields the context lacks
/// score zero. An arm without metadata, or no context, scores zero.
#[must_use]
pub fn context_similarity(arm_meta: &Meta, context: Option<&Meta>) -> f64 {
    let Some(context) = context else {
        return 0.0;
    };
    if arm_meta.is_empty() {
        return 0.0;
    }

    let total: f64 = arm_meta
        .iter()
        .filter_map(|(key, value)| context.get(key).map(|c| field_similarity(value, c)))
        .sum();

    total / ratio(arm_meta.len(), 1)
}
