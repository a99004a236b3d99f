//! Ownership marker.
//!
//! Records written by the reconciler carry a boolean attribute set to `true`.
//! Anything else in the table belongs to some other writer and is left alone.

use serde_json::Value;

use crate::types::SeedRecord;

/// Attribute name used when none is configured.
pub const DEFAULT_MARKER_ATTRIBUTE: &str = "Seedkeeper:Owned";

/// Tags records as owned and tests whether a record is owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipMarker {
    attribute: String,
}

impl Default for OwnershipMarker {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_ATTRIBUTE)
    }
}

impl OwnershipMarker {
    /// Create a marker that uses the given attribute name.
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }

    /// The attribute name carrying the marker.
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Set the marker attribute to `true`, leaving every other attribute as is.
    #[must_use]
    pub fn mark(&self, mut record: SeedRecord) -> SeedRecord {
        record.insert(self.attribute.clone(), Value::Bool(true));
        record
    }

    /// Whether the record carries the marker.
    ///
    /// Only a literal boolean `true` counts. A missing attribute, `false`, or
    /// a value of any other type means the record is not owned.
    pub fn is_owned(&self, record: &SeedRecord) -> bool {
        matches!(record.get(&self.attribute), Some(Value::Bool(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> SeedRecord {
        SeedRecord::try_from(value).unwrap_or_default()
    }

    #[test]
    fn test_mark_sets_attribute() {
        let marker = OwnershipMarker::default();
        let marked = marker.mark(record(json!({"Id": "0", "Name": "Foo"})));

        assert!(marker.is_owned(&marked));
        assert_eq!(marked.get("Name"), Some(&json!("Foo")));
        assert_eq!(marked.get(DEFAULT_MARKER_ATTRIBUTE), Some(&json!(true)));
    }

    #[test]
    fn test_mark_is_stable() {
        let marker = OwnershipMarker::new("Owned");
        let once = marker.mark(record(json!({"Id": "0", "Name": "Foo"})));
        let twice = marker.mark(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_mark_overrides_explicit_false() {
        let marker = OwnershipMarker::new("Owned");
        let marked = marker.mark(record(json!({"Id": "0", "Owned": false})));
        assert!(marker.is_owned(&marked));
    }

    #[test]
    fn test_absent_or_non_true_is_not_owned() {
        let marker = OwnershipMarker::new("Owned");
        assert!(!marker.is_owned(&record(json!({"Id": "0"}))));
        assert!(!marker.is_owned(&record(json!({"Id": "0", "Owned": false}))));
        assert!(!marker.is_owned(&record(json!({"Id": "0", "Owned": "true"}))));
        assert!(!marker.is_owned(&record(json!({"Id": "0", "Owned": 1}))));
        assert!(marker.is_owned(&record(json!({"Id": "0", "Owned": true}))));
    }
}
