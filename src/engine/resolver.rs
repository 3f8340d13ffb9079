// The Resolver Interface (spec.md §4.3) — the sole external
// collaborator contract the evaluator depends on for storage/service
// I/O. Concrete backends (SQL, vector, graph) are out of scope
// (spec.md §1); `InMemoryResolver` below is the crate's own reference
// implementation, used by default and by the test suite.
//
// Shaped directly after the teacher's `WorkflowStorage` trait
// (`engine::storage`): an `async_trait` contract over `Result<T>`,
// with an `InMemoryStorage`-style `RwLock<HashMap<_>>` implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AgentlangError, Result};
use crate::models::instance::QueryOp;
use crate::models::{FqName, Instance};

/// Opaque transaction handle returned by `start_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for TransactionId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Per-call authorization context the core passes to every resolver
/// operation (spec.md §4.3, "The resolver receives an `authInfo`
/// object per call").
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: String,
    pub read_for_update: bool,
    pub read_for_delete: bool,
}

impl AuthInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            read_for_update: false,
            read_for_delete: false,
        }
    }
}

/// One equi-join clause between the query's root entity and another,
/// compiled from `models::pattern::JoinClause` by the evaluator before
/// it reaches the resolver (spec.md §4.4 item 4).
#[derive(Debug, Clone)]
pub struct JoinInfo {
    pub kind: crate::models::JoinKind,
    pub entity: FqName,
    pub left_attribute: String,
    pub right_attribute: String,
}

/// A resolved `@into` projection column.
#[derive(Debug, Clone)]
pub enum IntoColumn {
    Alias { alias: String, attribute: String },
    Sum { alias: String, attribute: String },
    Count { alias: String, attribute: String },
    Avg { alias: String, attribute: String },
    Min { alias: String, attribute: String },
    Max { alias: String, attribute: String },
}

/// A resolved `@where` predicate applied after the join, before
/// grouping (spec.md §4.4 item 4).
#[derive(Debug, Clone)]
pub struct WherePredicate {
    pub attribute: String,
    pub op: QueryOp,
    pub value: crate::models::Value,
}

/// Everything `queryByJoin` needs: the joins themselves, the `@into`
/// projection, optional `@where`/`@groupBy`/`@orderBy`, and `@distinct`
/// (spec.md §4.3, §4.4 item 4).
#[derive(Debug, Clone, Default)]
pub struct JoinSpec {
    pub joins: Vec<JoinInfo>,
    pub into: Vec<IntoColumn>,
    pub where_clauses: Vec<WherePredicate>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub descending: bool,
    pub distinct: bool,
}

impl JoinSpec {
    pub fn joins(mut self, joins: Vec<JoinInfo>) -> Self {
        self.joins = joins;
        self
    }
}

/// Storage/service backend contract (spec.md §4.3). Every method maps
/// 1:1 onto a row in the spec's operation table.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn start_transaction(&self) -> Result<TransactionId>;
    async fn commit_transaction(&self, txn: &TransactionId) -> Result<()>;
    async fn rollback_transaction(&self, txn: &TransactionId) -> Result<()>;

    /// `inst` arrives fully attributed, with a pre-computed `__path__`
    /// (spec.md §4.3). Fails with `UniqueViolation` on id collision.
    async fn create_instance(&self, auth: &AuthInfo, inst: Instance) -> Result<Instance>;

    /// Same as `create_instance`, except an id collision is swallowed
    /// and treated as an update (spec.md §4.3).
    async fn upsert_instance(&self, auth: &AuthInfo, inst: Instance) -> Result<Instance>;

    async fn update_instance(
        &self,
        auth: &AuthInfo,
        matched: Instance,
        new_attrs: HashMap<String, crate::models::Value>,
    ) -> Result<Instance>;

    async fn query_instances(&self, auth: &AuthInfo, query: &Instance) -> Result<Vec<Instance>>;

    async fn query_child_instances(
        &self,
        auth: &AuthInfo,
        parent_path: &str,
        query: &Instance,
    ) -> Result<Vec<Instance>>;

    async fn query_connected_instances(
        &self,
        auth: &AuthInfo,
        relationship: &str,
        connected: &Instance,
        query: &Instance,
    ) -> Result<Vec<Instance>>;

    async fn query_by_join(
        &self,
        auth: &AuthInfo,
        root: &Instance,
        spec: &JoinSpec,
    ) -> Result<Vec<serde_json::Value>>;

    async fn delete_instance(&self, auth: &AuthInfo, query: &Instance, purge: bool) -> Result<Vec<Instance>>;

    async fn connect_instances(
        &self,
        auth: &AuthInfo,
        a: &Instance,
        b: &Instance,
        relationship: &str,
        or_update: bool,
    ) -> Result<Instance>;

    async fn full_text_search(
        &self,
        auth: &AuthInfo,
        entity: &FqName,
        query: &str,
    ) -> Result<Vec<Instance>>;
}

/// Keys instances by `(fully-qualified entity name, id value as
/// string)`, since ids are heterogeneous (`Int`, `Uuid`, `Str`, ...).
type InstanceKey = (FqName, String);

fn instance_key(fq: &FqName, id_attr: &str, inst: &Instance) -> Option<InstanceKey> {
    inst.get(id_attr).map(|v| (fq.clone(), v.to_string()))
}

/// Reference resolver used by default and by the test suite. Not
/// durable, not distributed — see the limitations called out on the
/// teacher's `InMemoryStorage`, which this mirrors.
#[derive(Default)]
pub struct InMemoryResolver {
    instances: RwLock<HashMap<InstanceKey, Instance>>,
    links: RwLock<Vec<(String, InstanceKey, InstanceKey)>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(query: &Instance, candidate: &Instance) -> bool {
        if candidate.deleted {
            return false;
        }
        if query.query_all {
            return true;
        }
        query.query_attributes.iter().all(|(name, value, op)| {
            let Some(actual) = candidate.get(name) else {
                return false;
            };
            match op {
                QueryOp::Eq => actual == value,
                QueryOp::Ne => actual != value,
                QueryOp::Lt => actual.compare(value) == std::cmp::Ordering::Less,
                QueryOp::Le => actual.compare(value) != std::cmp::Ordering::Greater,
                QueryOp::Gt => actual.compare(value) == std::cmp::Ordering::Greater,
                QueryOp::Ge => actual.compare(value) != std::cmp::Ordering::Less,
                QueryOp::In => match value {
                    crate::models::Value::Array(items) => items.contains(actual),
                    _ => false,
                },
                QueryOp::Like => match (actual.as_str(), value.as_str()) {
                    (Some(a), Some(b)) => a.contains(b),
                    _ => false,
                },
                QueryOp::Between => false,
            }
        })
    }
}

#[async_trait]
impl Resolver for InMemoryResolver {
    async fn start_transaction(&self) -> Result<TransactionId> {
        Ok(Uuid::new_v4().into())
    }

    async fn commit_transaction(&self, _txn: &TransactionId) -> Result<()> {
        Ok(())
    }

    async fn rollback_transaction(&self, _txn: &TransactionId) -> Result<()> {
        Ok(())
    }

    async fn create_instance(&self, _auth: &AuthInfo, inst: Instance) -> Result<Instance> {
        let id_attr = "id";
        let key = instance_key(&inst.fq_name, id_attr, &inst)
            .ok_or_else(|| AgentlangError::ValidationError("instance has no id attribute".into()))?;
        let mut instances = self.instances.write().unwrap();
        if instances.contains_key(&key) {
            return Err(AgentlangError::UniqueViolation(format!(
                "{} already exists",
                inst.fq_name
            )));
        }
        instances.insert(key, inst.clone());
        Ok(inst)
    }

    async fn upsert_instance(&self, _auth: &AuthInfo, inst: Instance) -> Result<Instance> {
        let key = instance_key(&inst.fq_name, "id", &inst)
            .ok_or_else(|| AgentlangError::ValidationError("instance has no id attribute".into()))?;
        let mut instances = self.instances.write().unwrap();
        instances.insert(key, inst.clone());
        Ok(inst)
    }

    async fn update_instance(
        &self,
        _auth: &AuthInfo,
        matched: Instance,
        new_attrs: HashMap<String, crate::models::Value>,
    ) -> Result<Instance> {
        let key = instance_key(&matched.fq_name, "id", &matched)
            .ok_or_else(|| AgentlangError::NotFound(matched.fq_name.to_string()))?;
        let mut instances = self.instances.write().unwrap();
        let stored = instances
            .get_mut(&key)
            .ok_or_else(|| AgentlangError::NotFound(matched.fq_name.to_string()))?;
        for (name, value) in new_attrs {
            stored.set(name, value);
        }
        Ok(stored.clone())
    }

    async fn query_instances(&self, _auth: &AuthInfo, query: &Instance) -> Result<Vec<Instance>> {
        let instances = self.instances.read().unwrap();
        Ok(instances
            .values()
            .filter(|candidate| candidate.fq_name == query.fq_name && Self::matches(query, candidate))
            .cloned()
            .collect())
    }

    async fn query_child_instances(
        &self,
        _auth: &AuthInfo,
        parent_path: &str,
        query: &Instance,
    ) -> Result<Vec<Instance>> {
        let prefix = format!("{parent_path}/");
        let instances = self.instances.read().unwrap();
        Ok(instances
            .values()
            .filter(|candidate| {
                candidate.fq_name == query.fq_name
                    && candidate
                        .path
                        .as_deref()
                        .map(|p| p.starts_with(&prefix))
                        .unwrap_or(false)
                    && Self::matches(query, candidate)
            })
            .cloned()
            .collect())
    }

    async fn query_connected_instances(
        &self,
        _auth: &AuthInfo,
        relationship: &str,
        connected: &Instance,
        query: &Instance,
    ) -> Result<Vec<Instance>> {
        let connected_key = instance_key(&connected.fq_name, "id", connected)
            .ok_or_else(|| AgentlangError::ValidationError("connected instance has no id".into()))?;
        let links = self.links.read().unwrap();
        let instances = self.instances.read().unwrap();
        let mut result = Vec::new();
        for (rel, a, b) in links.iter() {
            if rel != relationship {
                continue;
            }
            let other = if *a == connected_key {
                Some(b)
            } else if *b == connected_key {
                Some(a)
            } else {
                None
            };
            if let Some(other_key) = other {
                if let Some(candidate) = instances.get(other_key) {
                    if candidate.fq_name == query.fq_name && Self::matches(query, candidate) {
                        result.push(candidate.clone());
                    }
                }
            }
        }
        Ok(result)
    }

    async fn query_by_join(
        &self,
        _auth: &AuthInfo,
        _root: &Instance,
        _spec: &JoinSpec,
    ) -> Result<Vec<serde_json::Value>> {
        // Join planning itself lives in `engine::joins`, which calls
        // back into `query_instances`/`query_connected_instances` on
        // this resolver to gather rows before projecting them. A
        // resolver is free to implement this natively (e.g. compile
        // to a SQL join); the in-memory reference implementation
        // defers entirely to the evaluator-side planner instead.
        Err(AgentlangError::JoinPlanningError(
            "InMemoryResolver delegates join planning to engine::joins".into(),
        ))
    }

    async fn delete_instance(&self, _auth: &AuthInfo, query: &Instance, purge: bool) -> Result<Vec<Instance>> {
        let mut instances = self.instances.write().unwrap();
        let matching_keys: Vec<InstanceKey> = instances
            .iter()
            .filter(|(_, candidate)| candidate.fq_name == query.fq_name && Self::matches(query, candidate))
            .map(|(k, _)| k.clone())
            .collect();

        let mut deleted = Vec::new();
        for key in matching_keys {
            if purge {
                if let Some(inst) = instances.remove(&key) {
                    deleted.push(inst);
                }
            } else if let Some(inst) = instances.get_mut(&key) {
                inst.deleted = true;
                deleted.push(inst.clone());
            }
        }
        Ok(deleted)
    }

    async fn connect_instances(
        &self,
        _auth: &AuthInfo,
        a: &Instance,
        b: &Instance,
        relationship: &str,
        or_update: bool,
    ) -> Result<Instance> {
        let key_a = instance_key(&a.fq_name, "id", a)
            .ok_or_else(|| AgentlangError::ValidationError("instance has no id".into()))?;
        let key_b = instance_key(&b.fq_name, "id", b)
            .ok_or_else(|| AgentlangError::ValidationError("instance has no id".into()))?;
        let mut links = self.links.write().unwrap();
        let already_linked = links
            .iter()
            .any(|(rel, x, y)| rel == relationship && *x == key_a && *y == key_b);
        if already_linked && !or_update {
            return Err(AgentlangError::ConstraintViolation(format!(
                "{relationship} already links the given instances"
            )));
        }
        if !already_linked {
            links.push((relationship.to_string(), key_a, key_b));
        }
        Ok(b.clone())
    }

    async fn full_text_search(
        &self,
        _auth: &AuthInfo,
        entity: &FqName,
        query: &str,
    ) -> Result<Vec<Instance>> {
        let needle = query.to_lowercase();
        let instances = self.instances.read().unwrap();
        Ok(instances
            .values()
            .filter(|candidate| {
                &candidate.fq_name == entity
                    && !candidate.deleted
                    && candidate
                        .attributes
                        .iter()
                        .any(|(_, v)| v.to_string().to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }
}
