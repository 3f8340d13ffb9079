// The RBAC Gate (spec.md §4.8).
//
// Generalizes the teacher's `RuleCondition::evaluate` (`models::rule`,
// matched against a token's metadata/data) into a predicate matched
// against `this.*` (the candidate instance) and `auth.*` (the active
// session), gating CRUD operations instead of workflow transitions.

use tracing::warn;

use crate::error::{AgentlangError, Result};
use crate::models::rbac::{Operation, WhereClause, WhereRhs};
use crate::models::{Instance, RbacSpec, Value};

use super::environment::Environment;

/// The active session's auth attributes, looked up by `auth.<field>`
/// in a rule's `where` clause (spec.md §4.8). `user_id` is always
/// present; `roles` lists every role the session holds.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl AuthContext {
    pub fn field(&self, name: &str) -> Value {
        match name {
            "user_id" | "user" => Value::Str(self.user_id.clone()),
            "roles" => Value::Array(self.roles.iter().cloned().map(Value::Str).collect()),
            _ => Value::Null,
        }
    }
}

/// True when any rule in `rbac` grants `op` to one of `auth`'s roles
/// and, when the rule carries a `where` clause, `instance` satisfies
/// it (spec.md §4.8).
///
/// Kernel-mode environments (`env.mode.kernel`) bypass the gate
/// entirely — used for the role/permission lookups the gate itself
/// needs, to avoid recursing back into RBAC (spec.md §4.8, §5).
pub fn check(
    rbac: &RbacSpec,
    op: Operation,
    instance: &Instance,
    auth: &AuthContext,
    env: &Environment,
) -> Result<bool> {
    if env.mode.kernel || auth.is_admin {
        return Ok(true);
    }

    for rule in rbac {
        if !rule.grants(op) {
            continue;
        }
        if !rule.roles.iter().any(|role| role == "*" || auth.roles.iter().any(|r| r == role)) {
            continue;
        }
        let satisfied = match &rule.where_clause {
            None => true,
            Some(clause) => eval_where(clause, instance, auth)?,
        };
        if satisfied {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Enforces `check`, returning `Unauthorised` on a write and treating
/// a denied read as the caller's job to filter silently (spec.md §4.8,
/// "Reads are silently filtered ... writes raise Unauthorised").
pub fn enforce(
    rbac: &RbacSpec,
    op: Operation,
    instance: &Instance,
    auth: &AuthContext,
    env: &Environment,
) -> Result<()> {
    if check(rbac, op, instance, auth, env)? {
        return Ok(());
    }
    if op == Operation::Read {
        return Ok(());
    }
    warn!(entity = %instance.fq_name, op = ?op, roles = ?auth.roles, "rbac denied");
    Err(AgentlangError::Unauthorised(format!(
        "{:?} denied on {} for role(s) {:?}",
        op, instance.fq_name, auth.roles
    )))
}

/// Reads filter out instances denied by RBAC rather than erroring
/// (spec.md §4.8).
pub fn filter_readable<'a>(
    rbac: &RbacSpec,
    instances: impl IntoIterator<Item = &'a Instance>,
    auth: &AuthContext,
    env: &Environment,
) -> Result<Vec<&'a Instance>> {
    let mut visible = Vec::new();
    for instance in instances {
        if check(rbac, Operation::Read, instance, auth, env)? {
            visible.push(instance);
        }
    }
    Ok(visible)
}

fn eval_where(clause: &WhereClause, instance: &Instance, auth: &AuthContext) -> Result<bool> {
    match clause {
        WhereClause::Equals { this_attr, rhs } => {
            let lhs = instance.get(this_attr).cloned().unwrap_or(Value::Null);
            Ok(lhs == resolve_rhs(rhs, auth))
        }
        WhereClause::NotEquals { this_attr, rhs } => {
            let lhs = instance.get(this_attr).cloned().unwrap_or(Value::Null);
            Ok(lhs != resolve_rhs(rhs, auth))
        }
        WhereClause::And(clauses) => {
            for c in clauses {
                if !eval_where(c, instance, auth)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        WhereClause::Or(clauses) => {
            for c in clauses {
                if eval_where(c, instance, auth)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        WhereClause::Not(inner) => Ok(!eval_where(inner, instance, auth)?),
    }
}

fn resolve_rhs(rhs: &WhereRhs, auth: &AuthContext) -> Value {
    match rhs {
        WhereRhs::AuthField(field) => auth.field(field),
        WhereRhs::Literal(value) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FqName, ModuleName};

    fn env() -> Environment {
        Environment::root("E", ModuleName::new("M"), "u1")
    }

    fn auth(user_id: &str, roles: &[&str]) -> AuthContext {
        AuthContext {
            user_id: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            is_admin: false,
        }
    }

    fn instance_owned_by(owner: &str) -> Instance {
        Instance::new(
            FqName::new("Acme", "Document"),
            vec![("owner".into(), Value::Str(owner.to_string()))],
        )
    }

    #[test]
    fn wildcard_role_without_where_grants_unconditionally() {
        let rbac = vec![crate::models::rbac::RbacRule::new(vec!["*".into()], vec![Operation::Read])];
        let inst = instance_owned_by("bob");
        assert!(check(&rbac, Operation::Read, &inst, &auth("alice", &["viewer"]), &env()).unwrap());
    }

    #[test]
    fn where_clause_restricts_to_matching_owner() {
        let rbac = vec![crate::models::rbac::RbacRule::new(vec!["owner".into()], vec![Operation::Update])
            .with_where(WhereClause::Equals {
                this_attr: "owner".into(),
                rhs: WhereRhs::AuthField("user_id".into()),
            })];
        let inst = instance_owned_by("alice");
        assert!(check(&rbac, Operation::Update, &inst, &auth("alice", &["owner"]), &env()).unwrap());
        assert!(!check(&rbac, Operation::Update, &inst, &auth("bob", &["owner"]), &env()).unwrap());
    }

    #[test]
    fn enforce_allows_read_denial_to_pass_silently_but_rejects_writes() {
        let rbac: RbacSpec = vec![];
        let inst = instance_owned_by("bob");
        let a = auth("alice", &["viewer"]);
        assert!(enforce(&rbac, Operation::Read, &inst, &a, &env()).is_ok());
        assert!(enforce(&rbac, Operation::Update, &inst, &a, &env()).is_err());
    }

    #[test]
    fn kernel_mode_bypasses_the_gate() {
        let rbac: RbacSpec = vec![];
        let inst = instance_owned_by("bob");
        let mut kernel_env = env();
        kernel_env.mode.kernel = true;
        assert!(check(&rbac, Operation::Delete, &inst, &auth("alice", &[]), &kernel_env).unwrap());
    }
}
