// Contains and Between relationships (spec.md §3, "Relationships").

use serde::{Deserialize, Serialize};

use super::ids::LocalName;

/// Cardinality of a Between relationship. Contains relationships have
/// no cardinality of their own — ownership is always one parent to
/// many children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    OneOne,
    OneMany,
    /// The default when a Between relationship declares no cardinality.
    ManyMany,
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::ManyMany
    }
}

/// The kind of relationship and the data specific to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Strict ownership: a child's lifetime is bounded by its parent;
    /// deleting the parent cascades (spec.md §3).
    Contains,
    /// A looser association with declared cardinality. May carry its
    /// own attribute schema (e.g. a many-to-many join record's extra
    /// columns).
    Between {
        cardinality: Cardinality,
        attributes: Vec<super::schema::AttributeSchema>,
    },
}

/// A declared relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSchema {
    pub name: LocalName,
    pub from: LocalName,
    pub to: LocalName,
    pub kind: RelationshipKind,
}

impl RelationshipSchema {
    pub fn contains(name: impl Into<LocalName>, from: impl Into<LocalName>, to: impl Into<LocalName>) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            to: to.into(),
            kind: RelationshipKind::Contains,
        }
    }

    pub fn between(
        name: impl Into<LocalName>,
        from: impl Into<LocalName>,
        to: impl Into<LocalName>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            to: to.into(),
            kind: RelationshipKind::Between {
                cardinality,
                attributes: Vec::new(),
            },
        }
    }

    pub fn is_contains(&self) -> bool {
        matches!(self.kind, RelationshipKind::Contains)
    }

    /// True when a between relationship is realized as a scalar
    /// reference column on the child side rather than a join record
    /// (one-to-one and one-to-many — spec.md §3).
    pub fn is_scalar_reference(&self) -> bool {
        matches!(
            self.kind,
            RelationshipKind::Between {
                cardinality: Cardinality::OneOne | Cardinality::OneMany,
                ..
            }
        )
    }

    /// True when a between relationship requires a link record
    /// (many-to-many).
    pub fn requires_link_record(&self) -> bool {
        matches!(
            self.kind,
            RelationshipKind::Between {
                cardinality: Cardinality::ManyMany,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_many_between_is_a_scalar_reference() {
        let rel = RelationshipSchema::between("UserPost", "User", "Post", Cardinality::OneMany);
        assert!(rel.is_scalar_reference());
        assert!(!rel.requires_link_record());
    }

    #[test]
    fn many_many_between_requires_a_link_record() {
        let rel = RelationshipSchema::between("UserPost", "User", "Post", Cardinality::ManyMany);
        assert!(rel.requires_link_record());
    }

    #[test]
    fn contains_is_never_a_scalar_reference() {
        let rel = RelationshipSchema::contains("Children", "Parent", "Child");
        assert!(rel.is_contains());
        assert!(!rel.is_scalar_reference());
    }
}
