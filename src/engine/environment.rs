// Transaction & Environment (spec.md §4.6).
//
// Grounded on the teacher's `AgentExecution` lifecycle
// (`Pending -> Running -> Completed/Failed`, `models::agent`),
// generalized from "one LLM call" to "one nested evaluation scope with
// its own per-resolver transaction bookkeeping".

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Instance, ModuleName, Value};

use super::resolver::{Resolver, TransactionId};

/// Mode flags carried by an environment (spec.md §4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeFlags {
    pub upsert: bool,
    pub delete: bool,
    /// Kernel/admin mode bypasses RBAC — used for role/permission
    /// lookups to avoid recursive gating (spec.md §4.8, §5).
    pub kernel: bool,
}

/// A pending Between-relationship link to emit once the instance
/// currently being created is stored (spec.md §4.4 item 3, "If
/// between-relationship context is attached via parent environment,
/// the created instance is also linked"). Set by
/// `Evaluator::eval_relationships` on the child environment it hands
/// to a nested relationship pattern.
#[derive(Debug, Clone)]
pub struct BetweenLink {
    pub relationship: String,
    /// `true` for one-to-one/one-to-many (a scalar reference column on
    /// the child); `false` for many-to-many (a link record).
    pub scalar: bool,
    pub parent: Instance,
    /// The parent's id attribute name, so a scalar link can read its
    /// value off `parent` without a second schema lookup.
    pub parent_id_attr: String,
}

/// A nested evaluation scope (spec.md §4.6, GLOSSARY "Environment").
///
/// Child environments share the root's transaction and resolver maps;
/// only the outermost owner commits or rolls back (spec.md §4.6,
/// "Nested environments (child) share the parent's transaction map").
pub struct Environment {
    pub event_name: String,
    pub active_module: ModuleName,
    pub active_user: String,
    pub last_result: Option<Value>,
    pub parent_path: Option<String>,
    /// The Contains-relationship name through which the instance about
    /// to be created is nested, if any (spec.md §4.4.1). `None` at the
    /// root or inside a Between relationship pattern.
    pub contains_relationship: Option<String>,
    /// The Between-relationship link to emit once the instance about
    /// to be created is stored, if any (spec.md §4.4 item 3).
    pub between_link: Option<BetweenLink>,
    pub mode: ModeFlags,
    pub return_pending: bool,
    bindings: HashMap<String, Value>,
    /// Shared with every descendant environment; only the root
    /// environment drives commit/rollback.
    shared: Arc<SharedTxnState>,
    is_root: bool,
}

#[derive(Default)]
struct SharedTxnState {
    resolvers: std::sync::Mutex<HashMap<String, Arc<dyn Resolver>>>,
    transactions: std::sync::Mutex<Vec<(String, TransactionId)>>,
}

impl Environment {
    pub fn root(event_name: impl Into<String>, active_module: ModuleName, active_user: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            active_module,
            active_user: active_user.into(),
            last_result: None,
            parent_path: None,
            contains_relationship: None,
            between_link: None,
            mode: ModeFlags::default(),
            return_pending: false,
            bindings: HashMap::new(),
            shared: Arc::new(SharedTxnState::default()),
            is_root: true,
        }
    }

    /// `new(eventName, parent?)`: inherits active module/user/
    /// transactions/resolvers from `parent` (spec.md §4.6). Bindings
    /// are seeded from the parent's so a nested scope can read an
    /// enclosing alias (spec.md §8 scenario 6); a subsequent `bind`
    /// call here only ever mutates this environment's own copy, so a
    /// rebinding never leaks back up to `parent`.
    pub fn child(parent: &Environment, event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            active_module: parent.active_module.clone(),
            active_user: parent.active_user.clone(),
            last_result: None,
            parent_path: parent.parent_path.clone(),
            contains_relationship: parent.contains_relationship.clone(),
            between_link: parent.between_link.clone(),
            mode: parent.mode,
            return_pending: false,
            bindings: parent.bindings.clone(),
            shared: Arc::clone(&parent.shared),
            is_root: false,
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Captures this environment's bindings so a caller that reuses a
    /// single `Environment` across a branch/loop body (`exec_graph`'s
    /// walker, which has no per-frame `Environment` of its own) can
    /// restore them afterwards, discarding whatever the body bound or
    /// rebound locally (spec.md §8 scenario 6).
    pub fn snapshot_bindings(&self) -> HashMap<String, Value> {
        self.bindings.clone()
    }

    pub fn restore_bindings(&mut self, snapshot: HashMap<String, Value>) {
        self.bindings = snapshot;
    }

    pub fn set_last_result(&mut self, value: Value) {
        self.last_result = Some(value);
    }

    /// Called the first time a named resolver is used in this
    /// environment tree: registers the resolver and starts a
    /// transaction on it if one isn't already running (spec.md §4.6,
    /// "On first use of a resolver, startTransaction() is called").
    pub async fn ensure_transaction(&self, resolver_name: &str, resolver: Arc<dyn Resolver>) -> Result<()> {
        {
            let resolvers = self.shared.resolvers.lock().unwrap();
            if resolvers.contains_key(resolver_name) {
                return Ok(());
            }
        }
        let txn_id = resolver.start_transaction().await?;
        let mut resolvers = self.shared.resolvers.lock().unwrap();
        let mut transactions = self.shared.transactions.lock().unwrap();
        resolvers.insert(resolver_name.to_string(), resolver);
        transactions.push((resolver_name.to_string(), txn_id));
        Ok(())
    }

    pub fn active_resolver(&self, resolver_name: &str) -> Option<Arc<dyn Resolver>> {
        self.shared.resolvers.lock().unwrap().get(resolver_name).cloned()
    }

    /// Commits every resolver transaction started within this
    /// environment's tree, in insertion order (spec.md §4.6, §5 —
    /// "there is no two-phase commit"). Only meaningful on the root
    /// environment; a child calling this is a programming error the
    /// evaluator must not make.
    pub async fn commit_all(&self) -> Result<()> {
        debug_assert!(self.is_root, "only the root environment commits");
        let entries: Vec<(String, TransactionId)> = self.shared.transactions.lock().unwrap().clone();
        let resolvers = self.shared.resolvers.lock().unwrap().clone();
        for (name, txn) in entries {
            if let Some(resolver) = resolvers.get(&name) {
                resolver.commit_transaction(&txn).await?;
            }
        }
        debug!(event = %self.event_name, "transaction committed");
        Ok(())
    }

    /// Rolls back every resolver transaction started within this
    /// environment's tree, in reverse start-order (spec.md §7,
    /// "rolls back ... in reverse start-order").
    pub async fn rollback_all(&self) -> Result<()> {
        debug_assert!(self.is_root, "only the root environment rolls back");
        let mut entries: Vec<(String, TransactionId)> = self.shared.transactions.lock().unwrap().clone();
        entries.reverse();
        let resolvers = self.shared.resolvers.lock().unwrap().clone();
        for (name, txn) in entries {
            if let Some(resolver) = resolvers.get(&name) {
                resolver.rollback_transaction(&txn).await?;
            }
        }
        warn!(event = %self.event_name, "transaction rolled back");
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::resolver::InMemoryResolver;

    #[tokio::test]
    async fn child_environment_shares_parent_transaction_map() {
        let root = Environment::root("CreateUser", ModuleName::new("Acme"), "u1");
        let resolver: Arc<dyn Resolver> = Arc::new(InMemoryResolver::new());
        root.ensure_transaction("default", Arc::clone(&resolver)).await.unwrap();

        let child = Environment::child(&root, "nested");
        assert!(child.active_resolver("default").is_some());
        // ensure_transaction on the child should be a no-op (already started)
        child.ensure_transaction("default", resolver).await.unwrap();
        assert_eq!(root.shared.transactions.lock().unwrap().len(), 1);
    }

    #[test]
    fn child_reads_fall_through_but_writes_stay_local() {
        let mut root = Environment::root("E", ModuleName::new("M"), "u1");
        root.bind("x", Value::Int(1));
        let mut child = Environment::child(&root, "E2");
        assert_eq!(child.lookup("x"), Some(&Value::Int(1)));

        child.bind("x", Value::Int(2));
        assert_eq!(child.lookup("x"), Some(&Value::Int(2)));
        assert_eq!(root.lookup("x"), Some(&Value::Int(1)), "child rebind must not leak into parent");
    }

    #[test]
    fn snapshot_restore_discards_bindings_made_since_the_snapshot() {
        let mut env = Environment::root("E", ModuleName::new("M"), "u1");
        env.bind("e", Value::Int(1));
        let snapshot = env.snapshot_bindings();
        env.bind("e", Value::Int(100));
        assert_eq!(env.lookup("e"), Some(&Value::Int(100)));

        env.restore_bindings(snapshot);
        assert_eq!(env.lookup("e"), Some(&Value::Int(1)));
    }
}
