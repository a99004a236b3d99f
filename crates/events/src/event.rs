//! Lifecycle event types.
//!
//! The orchestrator sends an untyped JSON envelope. It is validated once,
//! here, into a [`LifecycleEvent`]; nothing downstream looks at raw JSON.

use std::fmt;
use std::str::FromStr;

use seedkeeper_reconciler::Declaration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Kind of lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// The managed resource is being created.
    Create,
    /// The managed resource's properties changed.
    Update,
    /// The managed resource is being deleted.
    Delete,
}

impl RequestType {
    /// Wire name of the request type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            other => Err(Error::unknown_request_type(other)),
        }
    }
}

/// Correlation fields the orchestrator expects echoed back in the report.
///
/// All optional; events that arrive through other channels carry none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseContext {
    /// Where the outcome report is delivered.
    #[serde(rename = "ResponseURL", default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
    /// Stack the managed resource belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    /// Identifier of this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Template name of the managed resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_resource_id: Option<String>,
    /// Physical identifier of the managed resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
}

impl ResponseContext {
    /// Pull whatever correlation fields are present out of a raw envelope.
    ///
    /// Never fails: a failure report has to be addressed even when the rest
    /// of the envelope is unusable.
    pub fn extract(envelope: &Value) -> Self {
        let field = |name: &str| envelope.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            response_url: field("ResponseURL"),
            stack_id: field("StackId"),
            request_id: field("RequestId"),
            logical_resource_id: field("LogicalResourceId"),
            physical_resource_id: field("PhysicalResourceId"),
        }
    }

    /// Fill in the physical resource id if the orchestrator did not send one.
    #[must_use]
    pub fn with_default_physical_id(mut self, physical_id: impl Into<String>) -> Self {
        if self.physical_resource_id.is_none() {
            self.physical_resource_id = Some(physical_id.into());
        }
        self
    }
}

/// The table a lifecycle event targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTarget {
    /// Store identifier.
    pub table_name: String,
    /// Attribute the table is keyed on.
    pub hash_key: String,
}

/// What the orchestrator is asking for.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleRequest {
    /// Install the declaration for a new resource.
    Create { declaration: Declaration },
    /// Replace the owned records with a new declaration.
    Update { declaration: Declaration },
    /// The resource is going away.
    Delete,
}

/// A validated lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    /// The requested operation.
    pub request: LifecycleRequest,
    /// Target table.
    pub target: TableTarget,
    /// Correlation fields for the report.
    pub context: ResponseContext,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEvent {
    request_type: String,
    #[serde(default)]
    resource_properties: Option<RawProperties>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawProperties {
    #[serde(default)]
    hash_key: Option<String>,
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default)]
    items: Option<RawItems>,
}

/// `Items` normally arrives as JSON text; a literal array is accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawItems {
    Text(String),
    Literal(Value),
}

impl LifecycleEvent {
    /// Parse an event from envelope text.
    ///
    /// # Errors
    ///
    /// See [`LifecycleEvent::from_value`].
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::malformed_event(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Validate a decoded envelope.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedEvent`] if `RequestType`, `ResourceProperties`,
    ///   `TableName` or `HashKey` is missing or empty
    /// - [`Error::UnknownRequestType`] for anything but Create, Update, Delete
    /// - `MalformedDeclaration` / `MissingKey` (wrapped in [`Error::Reconcile`])
    ///   if the `Items` of a Create or Update do not form a valid declaration
    pub fn from_value(value: Value) -> Result<Self> {
        let context = ResponseContext::extract(&value);
        let raw: RawEvent = serde_json::from_value(value)
            .map_err(|e| Error::malformed_event(e.to_string()))?;
        let request_type: RequestType = raw.request_type.parse()?;

        let properties = raw
            .resource_properties
            .ok_or_else(|| Error::malformed_event("ResourceProperties is required"))?;
        let target = TableTarget {
            table_name: required(properties.table_name, "TableName")?,
            hash_key: required(properties.hash_key, "HashKey")?,
        };

        let request = match request_type {
            RequestType::Create => LifecycleRequest::Create {
                declaration: parse_items(properties.items, &target.hash_key)?,
            },
            RequestType::Update => LifecycleRequest::Update {
                declaration: parse_items(properties.items, &target.hash_key)?,
            },
            RequestType::Delete => LifecycleRequest::Delete,
        };

        Ok(Self {
            request,
            target,
            context,
        })
    }

    /// The request type.
    pub const fn request_type(&self) -> RequestType {
        match self.request {
            LifecycleRequest::Create { .. } => RequestType::Create,
            LifecycleRequest::Update { .. } => RequestType::Update,
            LifecycleRequest::Delete => RequestType::Delete,
        }
    }

    /// The declaration carried by a Create or Update.
    pub const fn declaration(&self) -> Option<&Declaration> {
        match &self.request {
            LifecycleRequest::Create { declaration } | LifecycleRequest::Update { declaration } => {
                Some(declaration)
            }
            LifecycleRequest::Delete => None,
        }
    }

    /// Physical id reported for the managed resource.
    ///
    /// Stable per table, so updates never look like replacements.
    pub fn physical_resource_id(&self) -> String {
        self.context
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| format!("seedkeeper-{}", self.target.table_name))
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::malformed_event(format!("{name} is required"))),
    }
}

fn parse_items(items: Option<RawItems>, hash_key: &str) -> Result<Declaration> {
    let declaration = match items {
        Some(RawItems::Text(text)) => Declaration::parse(&text)?,
        Some(RawItems::Literal(value)) => Declaration::from_value(value)?,
        None => {
            return Err(seedkeeper_reconciler::Error::malformed_declaration("Items is required").into());
        }
    };
    declaration.validate(hash_key)?;
    Ok(declaration)
}
