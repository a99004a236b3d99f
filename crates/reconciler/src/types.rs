//! Core types for the reconciler.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A single record: attribute name to value.
///
/// Serializes as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedRecord(Map<String, Value>);

impl SeedRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Set an attribute, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// The record's hash-key value, if it is present and a string.
    pub fn key(&self, hash_key: &str) -> Option<&str> {
        self.0.get(hash_key).and_then(Value::as_str)
    }

    /// All attributes.
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the record, returning its attribute map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for SeedRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for SeedRecord {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::malformed_declaration(format!(
                "expected a record object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

/// A declared record paired with its validated hash-key value.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecord {
    /// Hash-key value.
    pub key: String,
    /// The record as declared.
    pub record: SeedRecord,
}

/// The full, authoritative set of records to own after reconciliation.
///
/// Order matters only for duplicate keys: the later entry wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Declaration {
    records: Vec<SeedRecord>,
}

impl Declaration {
    /// Create a new empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a declaration from records.
    pub fn from_records(records: Vec<SeedRecord>) -> Self {
        Self { records }
    }

    /// Parse declaration text: a JSON array of JSON objects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedDeclaration`] when the text is not JSON, is
    /// not an array, or contains a non-object element.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::malformed_declaration(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Build a declaration from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedDeclaration`] when the value is not an array
    /// of objects.
    pub fn from_value(value: Value) -> Result<Self> {
        let elements = match value {
            Value::Array(elements) => elements,
            other => {
                return Err(Error::malformed_declaration(format!(
                    "expected an array of records, found {}",
                    json_kind(&other)
                )));
            }
        };

        elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| match element {
                Value::Object(map) => Ok(SeedRecord(map)),
                other => Err(Error::malformed_declaration(format!(
                    "element {index} is {}, expected an object",
                    json_kind(&other)
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self::from_records)
    }

    /// Add a record at the end.
    pub fn push(&mut self, record: SeedRecord) {
        self.records.push(record);
    }

    /// Declared records in order.
    pub fn records(&self) -> &[SeedRecord] {
        &self.records
    }

    /// Number of declared records, duplicates included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the declaration is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check every record carries a usable hash-key value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingKey`] for an absent or null key and
    /// [`Error::MalformedDeclaration`] for a key that is not a non-empty string.
    pub fn validate(&self, hash_key: &str) -> Result<()> {
        self.keyed(hash_key).map(|_| ())
    }

    /// Validate and collapse duplicate keys.
    ///
    /// The last record declared for a key wins; it takes the position of the
    /// first record declared with that key.
    ///
    /// # Errors
    ///
    /// Same as [`Declaration::validate`].
    pub fn resolve(&self, hash_key: &str) -> Result<Vec<KeyedRecord>> {
        let keyed = self.keyed(hash_key)?;
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(keyed.len());
        let mut resolved: Vec<KeyedRecord> = Vec::with_capacity(keyed.len());

        for entry in keyed {
            match positions.get(&entry.key).copied() {
                Some(position) => {
                    if let Some(slot) = resolved.get_mut(position) {
                        *slot = entry;
                    }
                }
                None => {
                    positions.insert(entry.key.clone(), resolved.len());
                    resolved.push(entry);
                }
            }
        }

        Ok(resolved)
    }

    fn keyed(&self, hash_key: &str) -> Result<Vec<KeyedRecord>> {
        if hash_key.is_empty() {
            return Err(Error::malformed_declaration(
                "hash key attribute name is empty",
            ));
        }

        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| match record.get(hash_key) {
                None | Some(Value::Null) => Err(Error::missing_key(hash_key, index)),
                Some(Value::String(key)) if key.is_empty() => Err(Error::malformed_declaration(
                    format!("record at position {index} has an empty '{hash_key}'"),
                )),
                Some(Value::String(key)) => Ok(KeyedRecord {
                    key: key.clone(),
                    record: record.clone(),
                }),
                Some(other) => Err(Error::malformed_declaration(format!(
                    "record at position {index} has a {} '{hash_key}', expected a string",
                    json_kind(other)
                ))),
            })
            .collect()
    }
}

impl FromIterator<SeedRecord> for Declaration {
    fn from_iter<I: IntoIterator<Item = SeedRecord>>(iter: I) -> Self {
        Self::from_records(iter.into_iter().collect())
    }
}

/// What one reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    /// Owned records removed during the purge.
    pub purged: usize,
    /// Records written after the purge.
    pub installed: usize,
    /// Declared records dropped because a later entry shared their key.
    pub duplicates_collapsed: usize,
}

pub(crate) const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
