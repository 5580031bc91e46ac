use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A namespace-qualified name for a node or property.
///
/// Names are immutable and cheap to clone (the namespace URI and local part
/// are shared `Arc<str>` allocations). Equality and hashing are structural,
/// so two independently constructed names with the same namespace and local
/// part compare equal and collide in maps, which is the interning the rest
/// of the engine relies on for name lookups.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    namespace: Arc<str>,
    local: Arc<str>,
}

impl Name {
    /// Create a name in the given namespace URI.
    ///
    /// Returns an error if the local part is empty. An empty namespace URI is
    /// the "no namespace" case used by most application names.
    pub fn new(namespace: impl AsRef<str>, local: impl AsRef<str>) -> Result<Self, TypeError> {
        let local = local.as_ref();
        if local.is_empty() {
            return Err(TypeError::InvalidName("empty local part".into()));
        }
        if local.contains(['/', '[', ']']) {
            return Err(TypeError::InvalidName(format!(
                "local part {local:?} contains a path delimiter"
            )));
        }
        Ok(Self {
            namespace: namespace.as_ref().into(),
            local: local.into(),
        })
    }

    /// Create a name with no namespace.
    pub fn local(local: impl AsRef<str>) -> Result<Self, TypeError> {
        Self::new("", local)
    }

    /// The namespace URI; empty string when the name is unqualified.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The local part of the name.
    pub fn local_part(&self) -> &str {
        &self.local
    }

    /// Returns `true` if the name carries no namespace.
    pub fn is_unqualified(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Parse from the display form: `local` or `{uri}local`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if let Some(rest) = s.strip_prefix('{') {
            let Some((uri, local)) = rest.split_once('}') else {
                return Err(TypeError::InvalidName(format!(
                    "unterminated namespace in {s:?}"
                )));
            };
            Self::new(uri, local)
        } else {
            Self::local(s)
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}
