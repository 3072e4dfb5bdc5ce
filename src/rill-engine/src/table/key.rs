//! Group keys.

use std::fmt;
use std::sync::Arc;

use super::ScalarValue;

/// Ordered `(column label, value)` pairs identifying the group a table's rows
/// belong to.
///
/// Keys are cheap to clone and totally ordered, so they double as map keys in
/// dataset caches and as the sort key when normalizing results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GroupKey {
    columns: Arc<[(String, ScalarValue)]>,
}

impl GroupKey {
    /// Create a key from label/value pairs, in key-column order.
    pub fn new(columns: impl IntoIterator<Item = (String, ScalarValue)>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    /// The empty key.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of key columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the key has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Key column labels in order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(label, _)| label.as_str())
    }

    /// Label/value pairs in order.
    pub fn columns(&self) -> &[(String, ScalarValue)] {
        &self.columns
    }

    /// Value of a key column.
    pub fn value(&self, label: &str) -> Option<&ScalarValue> {
        self.columns
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v)
    }

    /// Whether `label` is one of the key columns.
    pub fn has_column(&self, label: &str) -> bool {
        self.value(label).is_some()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (label, value)) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{label}={value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Time;

    fn window(start: i64, stop: i64) -> GroupKey {
        GroupKey::new([
            ("_start".to_string(), Time::new(start).into()),
            ("_stop".to_string(), Time::new(stop).into()),
        ])
    }

    #[test]
    fn test_lookup_and_display() {
        let key = window(0, 5);
        assert_eq!(key.len(), 2);
        assert_eq!(key.value("_stop"), Some(&ScalarValue::Time(Time::new(5))));
        assert!(key.value("_time").is_none());
        assert_eq!(key.to_string(), "{_start=0ns,_stop=5ns}");
        assert_eq!(GroupKey::empty().to_string(), "{}");
    }

    #[test]
    fn test_keys_order_by_values() {
        let mut keys = vec![window(5, 10), window(0, 5)];
        keys.sort();
        assert_eq!(keys, vec![window(0, 5), window(5, 10)]);
    }
}
