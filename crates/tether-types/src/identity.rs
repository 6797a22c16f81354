//! Ordered identity tuples keying entity instances.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::ScalarValue;

/// The ordered tuple of identity-column values naming one entity row.
///
/// Tuples are comparable and hashable so they can key the identity map and
/// ordered edge sets. Order follows the entity descriptor's identity-column
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityTuple(Vec<ScalarValue>);

impl IdentityTuple {
    /// Build a tuple from ordered identity-column values.
    pub const fn new(values: Vec<ScalarValue>) -> Self {
        Self(values)
    }

    /// A single-column identity.
    pub fn single(value: ScalarValue) -> Self {
        Self(vec![value])
    }

    /// The tuple's values, in identity-column order.
    pub fn values(&self) -> &[ScalarValue] {
        &self.0
    }

    /// Number of identity columns.
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the tuple is empty (never true for a valid entity).
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ScalarValue>> for IdentityTuple {
    fn from(values: Vec<ScalarValue>) -> Self {
        Self(values)
    }
}

// Renders as `(a, b)` for log fields and error messages.
impl fmt::Display for IdentityTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tuples_key_sets_by_value() {
        let a = IdentityTuple::new(vec![ScalarValue::Int(1), ScalarValue::Text("x".to_owned())]);
        let b = IdentityTuple::new(vec![ScalarValue::Int(1), ScalarValue::Text("x".to_owned())]);
        let c = IdentityTuple::new(vec![ScalarValue::Int(2), ScalarValue::Text("x".to_owned())]);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn display_renders_parenthesized() {
        let t = IdentityTuple::new(vec![ScalarValue::Int(7), ScalarValue::Bool(true)]);
        assert_eq!(t.to_string(), "(7, true)");
    }
}
