use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::NodeId;
use crate::name::Name;
use crate::path::Path;

/// A single typed property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    Name(Name),
    Path(Path),
    /// A reference to another node by id. Every stored reference value is
    /// also recorded as a source→target edge for subgraph accounting.
    Reference(NodeId),
}

impl PropertyValue {
    /// Short lowercase tag for diagnostics and the persistent store's
    /// `value_type` column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
            Self::Binary(_) => "binary",
            Self::Name(_) => "name",
            Self::Path(_) => "path",
            Self::Reference(_) => "reference",
        }
    }

    /// The referenced node id, if this is a reference value.
    pub fn as_reference(&self) -> Option<NodeId> {
        match self {
            Self::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl From<NodeId> for PropertyValue {
    fn from(id: NodeId) -> Self {
        Self::Reference(id)
    }
}

/// A named, ordered, non-empty list of values attached to a node.
///
/// A node holds at most one property per [`Name`]; setting a property with an
/// existing name replaces the previous value list.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    name: Name,
    values: Vec<PropertyValue>,
}

impl Property {
    /// Create a multi-valued property. The value list may not be empty.
    pub fn new(name: Name, values: Vec<PropertyValue>) -> Result<Self, TypeError> {
        if values.is_empty() {
            return Err(TypeError::EmptyProperty);
        }
        Ok(Self { name, values })
    }

    /// Create a single-valued property.
    pub fn single(name: Name, value: impl Into<PropertyValue>) -> Self {
        Self {
            name,
            values: vec![value.into()],
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    /// The first value. Properties are never empty, so this always exists.
    pub fn first_value(&self) -> &PropertyValue {
        &self.values[0]
    }

    pub fn is_single(&self) -> bool {
        self.values.len() == 1
    }

    /// The ids of all reference values in order.
    pub fn referenced_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.values.iter().filter_map(PropertyValue::as_reference)
    }

    /// Replace the value list, keeping the name. The list may not be empty.
    pub fn with_values(&self, values: Vec<PropertyValue>) -> Result<Self, TypeError> {
        Self::new(self.name.clone(), values)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name.to_string())
            .field("values", &self.values)
            .finish()
    }
}
