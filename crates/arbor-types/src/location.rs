use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::NodeId;
use crate::name::Name;
use crate::path::Path;
use crate::property::Property;

/// A reference to a node by path, by id, by identification properties, or
/// any combination.
///
/// At least one component is always present. Equality is structural over all
/// components, so a path-only location and an id-only location referring to
/// the same node are *not* equal; stores report the fully-resolved "actual"
/// location (path and id) when they execute a request.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    path: Option<Path>,
    id: Option<NodeId>,
    id_properties: Vec<Property>,
}

impl Location {
    /// A location identified by path only.
    pub fn from_path(path: Path) -> Self {
        Self {
            path: Some(path),
            id: None,
            id_properties: Vec::new(),
        }
    }

    /// A location identified by node id only.
    pub fn from_id(id: NodeId) -> Self {
        Self {
            path: None,
            id: Some(id),
            id_properties: Vec::new(),
        }
    }

    /// A fully resolved location with both path and id.
    pub fn new(path: Path, id: NodeId) -> Self {
        Self {
            path: Some(path),
            id: Some(id),
            id_properties: Vec::new(),
        }
    }

    /// A location identified by identification properties.
    ///
    /// Fails unless at least one property is supplied.
    pub fn from_properties(id_properties: Vec<Property>) -> Result<Self, TypeError> {
        if id_properties.is_empty() {
            return Err(TypeError::EmptyLocation);
        }
        Ok(Self {
            path: None,
            id: None,
            id_properties,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn id_properties(&self) -> &[Property] {
        &self.id_properties
    }

    pub fn has_path(&self) -> bool {
        self.path.is_some()
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    /// The identification property with the given name, if present.
    pub fn id_property(&self, name: &Name) -> Option<&Property> {
        self.id_properties.iter().find(|p| p.name() == name)
    }

    /// This location with the path replaced (or supplied).
    pub fn with_path(&self, path: Path) -> Self {
        Self {
            path: Some(path),
            id: self.id,
            id_properties: self.id_properties.clone(),
        }
    }

    /// This location with the id replaced (or supplied).
    pub fn with_id(&self, id: NodeId) -> Self {
        Self {
            path: self.path.clone(),
            id: Some(id),
            id_properties: self.id_properties.clone(),
        }
    }

    /// Returns `true` if the two locations definitely refer to the same node:
    /// they share an id, or they share a path when neither has an id.
    pub fn is_same(&self, other: &Location) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => match (&self.path, &other.path) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<Path> for Location {
    fn from(path: Path) -> Self {
        Self::from_path(path)
    }
}

impl From<NodeId> for Location {
    fn from(id: NodeId) -> Self {
        Self::from_id(id)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, &self.id) {
            (Some(path), Some(id)) => write!(f, "{path} ({id})"),
            (Some(path), None) => write!(f, "{path}"),
            (None, Some(id)) => write!(f, "({id})"),
            (None, None) => {
                let names: Vec<String> = self
                    .id_properties
                    .iter()
                    .map(|p| p.name().to_string())
                    .collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({self})")
    }
}
