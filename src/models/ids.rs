// Identifier types for the module system
// These are the basic building blocks every other model refers to.

//! Name and identifier newtypes.
//!
//! Everything in a module (entities, relationships, attributes,
//! workflows) is addressed by a name that is unique *within its
//! owning scope* but not necessarily across the whole registry. A
//! fully-qualified name (`FqName`) ties a bare name to the module that
//! declares it, which is what the registry actually indexes on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a module, e.g. `"Acme.Crm"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleName(String);

impl ModuleName {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModuleName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bare name of an entity, relationship, attribute or workflow,
/// without its owning module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalName(String);

impl LocalName {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocalName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LocalName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for LocalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A name fully qualified by its module, e.g. `Acme.Crm/Customer`.
///
/// This is the key the module registry actually indexes entities,
/// relationships and workflows by; a bare `LocalName` is only
/// meaningful once resolved against an "in module" context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FqName {
    pub module: ModuleName,
    pub name: LocalName,
}

impl FqName {
    pub fn new(module: impl Into<ModuleName>, name: impl Into<LocalName>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Parses `Module.Path/Name` into its module and local name parts.
    ///
    /// Returns `None` if there is no `/` separator.
    pub fn parse(full: &str) -> Option<Self> {
        let (module, name) = full.rsplit_once('/')?;
        Some(Self::new(module, name))
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.name)
    }
}

/// Identifier for an attribute within an entity or relationship
/// schema. Plain wrapper, kept distinct from `LocalName` so schema
/// code reads unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeName(String);

impl AttributeName {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AttributeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AttributeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fq_name_parses_module_and_local_name() {
        let fq = FqName::parse("Acme.Crm/Customer").unwrap();
        assert_eq!(fq.module.as_str(), "Acme.Crm");
        assert_eq!(fq.name.as_str(), "Customer");
    }

    #[test]
    fn fq_name_without_separator_is_none() {
        assert!(FqName::parse("Customer").is_none());
    }

    #[test]
    fn fq_name_display_round_trips() {
        let fq = FqName::new("Acme.Crm", "Customer");
        assert_eq!(fq.to_string(), "Acme.Crm/Customer");
    }
}
