// RBAC rule declarations (spec.md §4.8 "RBAC Gate").
//
// `WhereClause` generalizes the teacher's `models::rule::RuleCondition`
// (field_exists/field_equals/field_greater_than/and/or/not) from
// "is this token allowed to fire this transition" to "does this
// instance satisfy this entity's access predicate", evaluated against
// `this.*` and `auth.*` instead of a flat field map.

use serde::{Deserialize, Serialize};

/// The CRUD operation an RBAC rule grants or a trigger fires for
/// (spec.md §4.7, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

/// A predicate over `this.*` (the candidate instance) and `auth.*`
/// (the active session), e.g. `auth.user = this.id` (spec.md §4.8).
///
/// Recursive, boxed the way the teacher's `RuleCondition::Not(Box<Rule>)`
/// is, to keep the enum's size bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WhereClause {
    /// `this.<attr> = auth.<field>` or `this.<attr> = <literal>`.
    Equals { this_attr: String, rhs: WhereRhs },
    NotEquals { this_attr: String, rhs: WhereRhs },
    And(Vec<WhereClause>),
    Or(Vec<WhereClause>),
    Not(Box<WhereClause>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WhereRhs {
    AuthField(String),
    Literal(crate::models::value::Value),
}

/// One RBAC rule: `(roles, allow, where?)` (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacRule {
    /// The role set this rule applies to; `*` (the implicit role every
    /// user has) is represented as the literal string `"*"`.
    pub roles: Vec<String>,
    pub allow: Vec<Operation>,
    pub where_clause: Option<WhereClause>,
}

impl RbacRule {
    pub fn new(roles: Vec<String>, allow: Vec<Operation>) -> Self {
        Self {
            roles,
            allow,
            where_clause: None,
        }
    }

    pub fn with_where(mut self, clause: WhereClause) -> Self {
        self.where_clause = Some(clause);
        self
    }

    pub fn applies_to_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == "*" || r == role)
    }

    pub fn grants(&self, op: Operation) -> bool {
        self.allow.contains(&op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_role_matches_any_role() {
        let rule = RbacRule::new(vec!["*".into()], vec![Operation::Create]);
        assert!(rule.applies_to_role("anyone"));
    }

    #[test]
    fn named_role_matches_only_itself() {
        let rule = RbacRule::new(vec!["editor".into()], vec![Operation::Update]);
        assert!(rule.applies_to_role("editor"));
        assert!(!rule.applies_to_role("viewer"));
    }

    #[test]
    fn grants_checks_requested_operation() {
        let rule = RbacRule::new(vec!["*".into()], vec![Operation::Read]);
        assert!(rule.grants(Operation::Read));
        assert!(!rule.grants(Operation::Delete));
    }
}
