//! Document predicates shared by every repository backend.
//!
//! A filter is a conjunction of conditions on top-level document fields. Field
//! names come from code (`&'static str`); values are always bound by the
//! backend, never spliced into query text.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the JSON value exactly.
    Eq { field: &'static str, value: Value },
    /// Numeric field is greater than or equal to the bound.
    Gte { field: &'static str, value: f64 },
    /// Numeric field is lower than or equal to the bound.
    Lte { field: &'static str, value: f64 },
}

impl Condition {
    pub fn field(&self) -> &'static str {
        match self {
            Condition::Eq { field, .. } | Condition::Gte { field, .. } | Condition::Lte { field, .. } => {
                *field
            }
        }
    }

    fn matches(&self, doc: &Value) -> bool {
        let Some(actual) = doc.get(self.field()) else {
            return false;
        };

        match self {
            Condition::Eq { value, .. } => actual == value,
            Condition::Gte { value, .. } => actual.as_f64().is_some_and(|n| n >= *value),
            Condition::Lte { value, .. } => actual.as_f64().is_some_and(|n| n <= *value),
        }
    }
}

/// Conjunction of [`Condition`]s. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    conditions: Vec<Condition>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            field,
            value: value.into(),
        });
        self
    }

    pub fn gte(mut self, field: &'static str, value: f64) -> Self {
        self.conditions.push(Condition::Gte { field, value });
        self
    }

    pub fn lte(mut self, field: &'static str, value: f64) -> Self {
        self.conditions.push(Condition::Lte { field, value });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a serialized document.
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_anything() {
        assert!(DocumentFilter::new().matches(&json!({})));
    }

    #[test]
    fn all_conditions_must_hold() {
        let doc = json!({ "name": "Potion", "price": 9.5 });

        let f = DocumentFilter::new().eq("name", "Potion").gte("price", 5.0).lte("price", 10.0);
        assert!(f.matches(&doc));

        let f = DocumentFilter::new().eq("name", "Potion").gte("price", 10.0);
        assert!(!f.matches(&doc));
    }

    #[test]
    fn missing_or_non_numeric_field_never_matches_range() {
        let doc = json!({ "name": "Potion", "price": "cheap" });
        assert!(!DocumentFilter::new().gte("price", 0.0).matches(&doc));
        assert!(!DocumentFilter::new().lte("weight", 100.0).matches(&doc));
    }
}
