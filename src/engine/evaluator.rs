// The pattern interpreter (spec.md §4.4 "Expression & Pattern Evaluator").
//
// Dispatches over all ten pattern kinds. Generalizes the teacher's
// `RulesEngine` (condition evaluation against a flat resource) into a
// full CRUD/relationship/control-flow interpreter; wraps every
// resolver call through `engine::policy`, gates every CRUD operation
// through `engine::rbac_gate`, fires `engine::triggers` around
// create/update/delete, and recomputes `@expr` attributes via
// `engine::expr` on every write.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{AgentlangError, Result};
use crate::models::instance::QueryOp;
use crate::models::module::ModuleRegistry;
use crate::models::pattern::{
    AliasBinding, AttributeSlot, CrudMap, DestructureSlot, Expr, Hints, Pattern, RelationshipPattern, Statement,
};
use crate::models::rbac::Operation;
use crate::models::schema::AttributeType;
use crate::models::{FqName, Instance, LocalName, ModuleName, RecordSchema, Value, WorkflowDefinition};

use super::environment::{BetweenLink, Environment};
use super::expr::{self, FunctionTable};
use super::graph::RelationshipGraph;
use super::joins;
use super::policy::{self, CircuitBreaker};
use super::rbac_gate::{self, AuthContext};
use super::resolver::AuthInfo;
use super::resolver_registry::ResolverRegistry;
use super::triggers::{self, EventBus, EventOperation, Phase, WorkflowExecutor};

/// What a statement evaluates to, before alias binding projects it
/// down to a single `Value` (spec.md §4.4, "Alias binding").
#[derive(Debug, Clone)]
pub enum Outcome {
    Value(Value),
    Instances(Vec<Instance>),
}

impl Outcome {
    fn into_value(self) -> Value {
        match self {
            Outcome::Value(v) => v,
            Outcome::Instances(instances) => {
                Value::Array(instances.iter().map(instance_to_value).collect())
            }
        }
    }
}

/// Projects an instance's attributes into a plain `Value::Map`. Does
/// not recurse into `related_instances`; callers that need nested
/// related data read `Instance::to_plain_data` directly.
fn instance_to_value(instance: &Instance) -> Value {
    let map = instance.attributes.iter().cloned().collect();
    Value::Map(map)
}

pub struct Evaluator {
    pub registry: Arc<ModuleRegistry>,
    pub resolvers: Arc<ResolverRegistry>,
    pub event_bus: Arc<EventBus>,
    pub config: EngineConfig,
    functions: FunctionTable,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Evaluator {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        resolvers: Arc<ResolverRegistry>,
        event_bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            resolvers,
            event_bus,
            config,
            functions: FunctionTable::new(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_function(&mut self, name: impl Into<String>, f: fn(&[Value], &Environment) -> Result<Value>) {
        self.functions.insert(name.into(), f);
    }

    pub(crate) fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    fn breaker_for(&self, resolver_name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().unwrap().get(resolver_name) {
            return Arc::clone(existing);
        }
        let breaker = Arc::new(CircuitBreaker::new(&self.config.policy));
        self.breakers
            .write()
            .unwrap()
            .insert(resolver_name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Runs every statement in order, binding each to its alias and
    /// stopping as soon as a `RETURN` pattern sets `return_pending`
    /// (spec.md §4.4 item 8).
    pub async fn run_workflow(
        &self,
        workflow: &WorkflowDefinition,
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<Value> {
        let mut last = Value::Null;
        for statement in &workflow.statements {
            last = self.eval_statement(statement, env, auth).await?;
            if env.return_pending {
                break;
            }
        }
        Ok(last)
    }

    /// Runs a single statement, catching it against `@catch` on
    /// failure. Visible to `exec_graph`'s walker as well, which drives
    /// the same leaf evaluation iteratively rather than via
    /// `run_workflow`'s plain `for` loop.
    pub async fn eval_statement(&self, stmt: &Statement, env: &mut Environment, auth: &AuthContext) -> Result<Value> {
        let outcome = Box::pin(self.eval_pattern(&stmt.pattern, env, auth)).await;
        let outcome = match outcome {
            Ok(o) => o,
            Err(err) => {
                if let Pattern::Crud(crud) = &stmt.pattern {
                    if let Some(clause) = triggers::match_catch(&crud.hints.catch, &err) {
                        Box::pin(self.eval_pattern(&clause.recovery, env, auth)).await?
                    } else {
                        return Err(err);
                    }
                } else {
                    return Err(err);
                }
            }
        };
        let value = outcome.into_value();
        bind_alias(&stmt.alias, &value, env);
        env.set_last_result(value.clone());
        Ok(value)
    }

    async fn eval_pattern(&self, pattern: &Pattern, env: &mut Environment, auth: &AuthContext) -> Result<Outcome> {
        match pattern {
            Pattern::Expr(e) => {
                let value = expr::eval(e, env, None, &self.functions)?;
                Ok(Outcome::Value(value))
            }
            Pattern::Crud(crud) => self.eval_crud(crud, env, auth).await,
            Pattern::Delete { inner, purge } => self.eval_delete(inner, *purge, env, auth).await,
            Pattern::ForEach { source, binding, body } => self.eval_for_each(source, binding, body, env, auth).await,
            Pattern::If { condition, then_branch, else_branch } => {
                self.eval_if(condition, then_branch, else_branch.as_deref(), env, auth).await
            }
            Pattern::Return(inner) => {
                let outcome = Box::pin(self.eval_pattern(inner, env, auth)).await?;
                env.return_pending = true;
                Ok(outcome)
            }
            Pattern::Suspend(inner) => {
                // Both this direct path and `exec_graph::walk` signal a
                // suspension the same way: by returning this error.
                // `exec_graph`'s walker catches it at the `SUSPEND` leaf
                // and turns it into a resumable `Suspension`; a caller
                // running a workflow through `run_workflow` directly
                // instead just sees the error, with no stack to resume
                // from. `exec_graph` is the only place pause/resume is
                // actually implemented (spec.md §4.9), so a host that
                // needs SUSPEND to work end to end drives workflows
                // through it rather than through `run_workflow`.
                let outcome = Box::pin(self.eval_pattern(inner, env, auth)).await?;
                let _ = outcome;
                Err(AgentlangError::SuspensionRequested(Uuid::new_v4().to_string()))
            }
            Pattern::FullTextSearch(search) => self.eval_full_text_search(search, env, auth).await,
        }
    }

    async fn eval_if(
        &self,
        condition: &crate::models::pattern::Expr,
        then_branch: &[Statement],
        else_branch: Option<&[Statement]>,
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<Outcome> {
        let cond = expr::eval(condition, env, None, &self.functions)?;
        let branch = if cond.is_truthy() { Some(then_branch) } else { else_branch };
        let Some(branch) = branch else {
            return Ok(Outcome::Value(Value::Null));
        };
        let mut child = Environment::child(env, env.event_name.clone());
        let mut last = Value::Null;
        for statement in branch {
            last = self.eval_statement(statement, &mut child, auth).await?;
            if child.return_pending {
                env.return_pending = true;
                break;
            }
        }
        Ok(Outcome::Value(last))
    }

    async fn eval_for_each(
        &self,
        source: &Pattern,
        binding: &str,
        body: &[Statement],
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<Outcome> {
        let source_outcome = Box::pin(self.eval_pattern(source, env, auth)).await?;
        let items: Vec<Value> = match source_outcome {
            Outcome::Instances(instances) => instances.iter().map(instance_to_value).collect(),
            Outcome::Value(Value::Array(items)) => items,
            Outcome::Value(other) => vec![other],
        };

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let mut child = Environment::child(env, env.event_name.clone());
            child.bind(binding, item);
            let mut last = Value::Null;
            for statement in body {
                last = self.eval_statement(statement, &mut child, auth).await?;
                if child.return_pending {
                    break;
                }
            }
            results.push(last);
        }
        Ok(Outcome::Value(Value::Array(results)))
    }

    async fn eval_full_text_search(
        &self,
        search: &crate::models::pattern::FullTextSearch,
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<Outcome> {
        let (fq, schema) = self.registry.resolve_record(&env.active_module, &search.entity)?;
        let auth_info = auth_info_for(auth, env);
        let resolver_name = self.resolvers.resolver_name_for(&fq);
        let resolver = self
            .resolvers
            .resolver_for(&fq)
            .ok_or_else(|| AgentlangError::ResolverUnavailable(format!("no resolver for {fq}")))?;
        let breaker = self.breaker_for(&resolver_name);
        let query = search.query.clone();
        let found = policy::call_with_policy(&self.config.policy, &breaker, || {
            let resolver = Arc::clone(&resolver);
            let auth_info = auth_info.clone();
            let fq = fq.clone();
            let query = query.clone();
            async move { resolver.full_text_search(&auth_info, &fq, &query).await }
        })
        .await?;

        let visible = rbac_gate::filter_readable(&schema.rbac, found.iter(), auth, env)?
            .into_iter()
            .cloned()
            .collect();
        Ok(Outcome::Instances(visible))
    }

    async fn resolver_for(&self, fq: &FqName) -> Result<(Arc<dyn super::resolver::Resolver>, Arc<CircuitBreaker>, AuthInfo)> {
        let resolver = self
            .resolvers
            .resolver_for(fq)
            .ok_or_else(|| AgentlangError::ResolverUnavailable(format!("no resolver for {fq}")))?;
        let resolver_name = self.resolvers.resolver_name_for(fq);
        let breaker = self.breaker_for(&resolver_name);
        Ok((resolver, breaker, AuthInfo::new(String::new())))
    }

    pub async fn eval_crud(&self, crud: &CrudMap, env: &mut Environment, auth: &AuthContext) -> Result<Outcome> {
        let (fq, schema) = self.registry.resolve_record(&env.active_module, &crud.entity)?;
        env.ensure_transaction(&self.resolvers.resolver_name_for(&fq), self.resolvers.resolver_for(&fq).ok_or_else(|| {
            AgentlangError::ResolverUnavailable(format!("no resolver for {fq}"))
        })?).await?;

        let mut set_attrs: Vec<(String, Value)> = Vec::new();
        let mut query_attrs: Vec<(String, Value, QueryOp)> = Vec::new();
        for slot in &crud.attributes {
            let value = expr::eval(&slot.value, env, None, &self.functions)?;
            match slot.query_op {
                Some(op) => query_attrs.push((slot.name.clone(), value, op)),
                None => set_attrs.push((slot.name.clone(), value)),
            }
        }

        let (resolver, breaker, _) = self.resolver_for(&fq).await?;
        let auth_info = auth_info_for(auth, env);

        if crud.query_all || (!query_attrs.is_empty() && set_attrs.is_empty()) {
            return self
                .eval_read(&fq, &schema, crud, query_attrs, &resolver, &breaker, &auth_info, env, auth)
                .await;
        }

        if !query_attrs.is_empty() && !set_attrs.is_empty() {
            return self
                .eval_update(&fq, &schema, query_attrs, set_attrs, &resolver, &breaker, &auth_info, env, auth)
                .await;
        }

        if set_attrs.is_empty() {
            return Err(AgentlangError::ValidationError(format!(
                "{} pattern carries neither query nor set attributes",
                crud.entity
            )));
        }

        self.eval_create(&fq, &schema, crud, set_attrs, &resolver, &breaker, &auth_info, env, auth).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn eval_create(
        &self,
        fq: &FqName,
        schema: &RecordSchema,
        crud: &CrudMap,
        set_attrs: Vec<(String, Value)>,
        resolver: &Arc<dyn super::resolver::Resolver>,
        breaker: &CircuitBreaker,
        auth_info: &AuthInfo,
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<Outcome> {
        let mut attributes = set_attrs.clone();

        // A one-to-one/one-to-many Between relationship is realized as
        // a scalar foreign key on the child; set it before `recompute`
        // so an `@expr` attribute referencing it sees the real value
        // (spec.md §4.4 item 3).
        if let Some(link) = env.between_link.clone() {
            if link.scalar {
                if let Some(fk_attr) = scalar_reference_attribute(schema, link.parent.fq_name.name.as_str()) {
                    let parent_id = link.parent.get(&link.parent_id_attr).cloned().unwrap_or(Value::Null);
                    upsert_attr(&mut attributes, fk_attr, parent_id);
                }
            }
        }

        let literals: HashMap<String, Value> = set_attrs.into_iter().collect();
        expr::recompute(schema, &mut attributes, &literals, env, &self.functions)?;

        let id_attr = schema.id_attribute().map(|a| a.name.as_str().to_string()).unwrap_or_else(|| "id".into());
        let id_value = attributes
            .iter()
            .find(|(n, _)| n == &id_attr)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null);

        let mut instance = Instance::new(fq.clone(), attributes);
        instance.auth_context = Some(auth.user_id.clone());
        instance.path = Some(build_path(env, &fq.module, fq.name.as_str(), &id_value));

        rbac_gate::enforce(&schema.rbac, Operation::Create, &instance, auth, env)?;

        triggers::dispatch(&schema.triggers, Phase::Before, Operation::Create, &mut instance, self).await?;

        let upsert = crud.hints.upsert;
        let created = policy::call_with_policy(&self.config.policy, breaker, || {
            let resolver = Arc::clone(resolver);
            let auth_info = auth_info.clone();
            let instance = instance.clone();
            async move {
                if upsert {
                    resolver.upsert_instance(&auth_info, instance).await
                } else {
                    resolver.create_instance(&auth_info, instance).await
                }
            }
        })
        .await?;

        let mut created = created;
        triggers::dispatch(&schema.triggers, Phase::After, Operation::Create, &mut created, self).await?;
        self.event_bus.emit_created(fq.clone(), &created, schema).await?;

        // A many-to-many Between relationship is realized as a link
        // record, written once the child instance itself exists
        // (spec.md §4.4 item 3, "the created instance is also linked").
        if let Some(link) = env.between_link.clone() {
            if !link.scalar {
                policy::call_with_policy(&self.config.policy, breaker, || {
                    let resolver = Arc::clone(resolver);
                    let auth_info = auth_info.clone();
                    let parent = link.parent.clone();
                    let created = created.clone();
                    let relationship = link.relationship.clone();
                    let or_update = crud.hints.upsert;
                    async move { resolver.connect_instances(&auth_info, &parent, &created, &relationship, or_update).await }
                })
                .await?;
            }
        }

        self.eval_relationships(crud, fq, &mut created, env, auth).await?;

        Ok(Outcome::Instances(vec![created]))
    }

    #[allow(clippy::too_many_arguments)]
    async fn eval_read(
        &self,
        fq: &FqName,
        schema: &RecordSchema,
        crud: &CrudMap,
        query_attrs: Vec<(String, Value, QueryOp)>,
        resolver: &Arc<dyn super::resolver::Resolver>,
        breaker: &CircuitBreaker,
        auth_info: &AuthInfo,
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<Outcome> {
        let query = if crud.query_all {
            Instance::query_all(fq.clone())
        } else {
            Instance::with_query(fq.clone(), Vec::new(), query_attrs)
        };

        let found = policy::call_with_policy(&self.config.policy, breaker, || {
            let resolver = Arc::clone(resolver);
            let auth_info = auth_info.clone();
            let query = query.clone();
            async move { resolver.query_instances(&auth_info, &query).await }
        })
        .await?;

        let mut visible: Vec<Instance> = rbac_gate::filter_readable(&schema.rbac, found.iter(), auth, env)?
            .into_iter()
            .cloned()
            .collect();

        self.eval_read_relationships(crud, fq, &mut visible, env, auth).await?;

        if !crud.hints.joins.is_empty() {
            let rows = joins::execute(
                &self.registry,
                &self.resolvers,
                &env.active_module,
                crud.entity.as_str(),
                visible,
                &crud.hints,
                auth_info,
                env,
                &self.functions,
            )
            .await?;
            return Ok(Outcome::Value(Value::Array(
                rows.into_iter().map(json_to_value).collect(),
            )));
        }

        if crud.hints.distinct {
            dedupe_instances(&mut visible, &crud.hints.group_by);
        }
        if let Some(limit) = crud.hints.limit {
            visible.truncate(limit as usize);
        }
        Ok(Outcome::Instances(visible))
    }

    #[allow(clippy::too_many_arguments)]
    async fn eval_update(
        &self,
        fq: &FqName,
        schema: &RecordSchema,
        query_attrs: Vec<(String, Value, QueryOp)>,
        set_attrs: Vec<(String, Value)>,
        resolver: &Arc<dyn super::resolver::Resolver>,
        breaker: &CircuitBreaker,
        auth_info: &AuthInfo,
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<Outcome> {
        let query = Instance::with_query(fq.clone(), Vec::new(), query_attrs);
        let matches = {
            let resolver = Arc::clone(resolver);
            let auth_info = auth_info.clone();
            let query = query.clone();
            policy::call_with_policy(&self.config.policy, breaker, move || {
                let resolver = Arc::clone(&resolver);
                let auth_info = auth_info.clone();
                let query = query.clone();
                async move { resolver.query_instances(&auth_info, &query).await }
            })
            .await?
        };

        let literals: HashMap<String, Value> = set_attrs.into_iter().collect();
        let mut updated = Vec::with_capacity(matches.len());
        for mut matched in matches {
            rbac_gate::enforce(&schema.rbac, Operation::Update, &matched, auth, env)?;
            triggers::dispatch(&schema.triggers, Phase::Before, Operation::Update, &mut matched, self).await?;

            let mut attributes = matched.attributes.clone();
            expr::recompute(schema, &mut attributes, &literals, env, &self.functions)?;
            let new_attrs: HashMap<String, Value> = attributes.into_iter().collect();

            let stored = {
                let resolver = Arc::clone(resolver);
                let auth_info = auth_info.clone();
                let matched = matched.clone();
                let new_attrs = new_attrs.clone();
                policy::call_with_policy(&self.config.policy, breaker, move || {
                    let resolver = Arc::clone(&resolver);
                    let auth_info = auth_info.clone();
                    let matched = matched.clone();
                    let new_attrs = new_attrs.clone();
                    async move { resolver.update_instance(&auth_info, matched, new_attrs).await }
                })
                .await?
            };

            let mut stored = stored;
            triggers::dispatch(&schema.triggers, Phase::After, Operation::Update, &mut stored, self).await?;
            self.event_bus.emit_updated(fq.clone(), &stored, schema).await?;
            updated.push(stored);
        }

        Ok(Outcome::Instances(updated))
    }

    pub async fn eval_delete(&self, inner: &CrudMap, purge: bool, env: &mut Environment, auth: &AuthContext) -> Result<Outcome> {
        let (fq, schema) = self.registry.resolve_record(&env.active_module, &inner.entity)?;
        let (resolver, breaker, _) = self.resolver_for(&fq).await?;
        let auth_info = auth_info_for(auth, env);

        let mut query_attrs = Vec::new();
        for slot in &inner.attributes {
            let value = expr::eval(&slot.value, env, None, &self.functions)?;
            query_attrs.push((slot.name.clone(), value, slot.query_op.unwrap_or(QueryOp::Eq)));
        }
        let query = if inner.query_all {
            Instance::query_all(fq.clone())
        } else {
            Instance::with_query(fq.clone(), Vec::new(), query_attrs)
        };

        let matches = policy::call_with_policy(&self.config.policy, &breaker, || {
            let resolver = Arc::clone(&resolver);
            let auth_info = auth_info.clone();
            let query = query.clone();
            async move { resolver.query_instances(&auth_info, &query).await }
        })
        .await?;

        let mut deleted = Vec::with_capacity(matches.len());
        for mut matched in matches {
            rbac_gate::enforce(&schema.rbac, Operation::Delete, &matched, auth, env)?;
            triggers::dispatch(&schema.triggers, Phase::Before, Operation::Delete, &mut matched, self).await?;

            if purge {
                self.cascade_purge(&env.active_module, &inner.entity, &matched, &auth_info, env).await?;
            }

            let single_query = Instance::with_query(
                fq.clone(),
                Vec::new(),
                schema
                    .id_attribute()
                    .and_then(|a| matched.get(a.name.as_str()).map(|v| (a.name.as_str().to_string(), v.clone(), QueryOp::Eq)))
                    .into_iter()
                    .collect(),
            );
            let rows = policy::call_with_policy(&self.config.policy, &breaker, || {
                let resolver = Arc::clone(&resolver);
                let auth_info = auth_info.clone();
                let single_query = single_query.clone();
                async move { resolver.delete_instance(&auth_info, &single_query, purge).await }
            })
            .await?;

            for mut row in rows {
                triggers::dispatch(&schema.triggers, Phase::After, Operation::Delete, &mut row, self).await?;
                self.event_bus.emit_deleted(fq.clone(), &row, schema).await?;
                deleted.push(row);
            }
        }

        Ok(Outcome::Instances(deleted))
    }

    /// Walks the contains-subtree and purges every descendant instance
    /// whose path lies under `matched`'s path (spec.md §4.4 item 5).
    async fn cascade_purge(
        &self,
        active_module: &ModuleName,
        root_entity: &str,
        matched: &Instance,
        auth_info: &AuthInfo,
        env: &Environment,
    ) -> Result<()> {
        let Some(parent_path) = &matched.path else {
            return Ok(());
        };
        let graph = super::graph::RelationshipGraph::for_module(&self.registry, active_module)?;
        for child_entity in graph.contains_subtree(&LocalName::new(root_entity)) {
            let (child_fq, child_schema) = self.registry.resolve_record(active_module, child_entity.as_str())?;
            let Some(child_resolver) = self.resolvers.resolver_for(&child_fq) else { continue };
            let query = Instance::query_all(child_fq.clone());
            let children = child_resolver.query_child_instances(auth_info, parent_path, &query).await?;
            for child in &children {
                child_resolver.delete_instance(auth_info, &Instance::query_all(child_fq.clone()), true).await?;
                self.event_bus.emit_deleted(child_fq.clone(), child, &child_schema).await?;
            }
        }
        let _ = env;
        Ok(())
    }

    /// Wires each nested relationship pattern into its declared kind
    /// (spec.md §4.4 item 3): Contains nests the child under `parent`'s
    /// path; Between attaches a `BetweenLink` so `eval_create` knows
    /// whether to set a scalar foreign key or write a link record.
    async fn eval_relationships(
        &self,
        crud: &CrudMap,
        parent_fq: &FqName,
        parent: &mut Instance,
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<()> {
        if crud.relationships.is_empty() {
            return Ok(());
        }
        let graph = RelationshipGraph::for_module(&self.registry, &env.active_module)?;
        let parent_id_attr = self
            .registry
            .resolve_record(&env.active_module, parent_fq.name.as_str())
            .ok()
            .and_then(|(_, schema)| schema.id_attribute().map(|a| a.name.as_str().to_string()))
            .unwrap_or_else(|| "id".into());

        for (rel_name, pattern) in &crud.relationships {
            let rel = graph
                .relationship(&LocalName::new(rel_name.as_str()))
                .ok_or_else(|| AgentlangError::NotFound(format!("relationship {rel_name}")))?;

            let mut child_env = Environment::child(env, env.event_name.clone());
            child_env.parent_path = parent.path.clone();
            if rel.is_contains() {
                child_env.contains_relationship = Some(rel_name.clone());
                child_env.between_link = None;
            } else {
                child_env.contains_relationship = None;
                child_env.between_link = Some(BetweenLink {
                    relationship: rel_name.clone(),
                    scalar: rel.is_scalar_reference(),
                    parent: parent.clone(),
                    parent_id_attr: parent_id_attr.clone(),
                });
            }

            let patterns: Vec<&Pattern> = match pattern {
                RelationshipPattern::Single(p) => vec![p.as_ref()],
                RelationshipPattern::List(ps) => ps.iter().collect(),
            };
            for p in patterns {
                let outcome = Box::pin(self.eval_pattern(p, &mut child_env, auth)).await?;
                if let Outcome::Instances(children) = outcome {
                    for child in children {
                        parent.attach_related(rel_name.clone(), child);
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetches each declared relationship's children for every already
    /// read `parent` and attaches them (spec.md §4.4 item 3): Contains
    /// via `query_child_instances` under the parent's path; a
    /// many-to-many Between via the resolver's link table
    /// (`query_connected_instances`); a one-to-one/one-to-many Between
    /// by filtering the child's scalar foreign key against the
    /// parent's id (the in-memory resolver's link table is populated
    /// only by `connect_instances`, so it can't answer a scalar lookup).
    async fn eval_read_relationships(
        &self,
        crud: &CrudMap,
        parent_fq: &FqName,
        parents: &mut [Instance],
        env: &mut Environment,
        auth: &AuthContext,
    ) -> Result<()> {
        if crud.relationships.is_empty() || parents.is_empty() {
            return Ok(());
        }
        let graph = RelationshipGraph::for_module(&self.registry, &env.active_module)?;
        let parent_id_attr = self
            .registry
            .resolve_record(&env.active_module, parent_fq.name.as_str())
            .ok()
            .and_then(|(_, schema)| schema.id_attribute().map(|a| a.name.as_str().to_string()))
            .unwrap_or_else(|| "id".into());

        for (rel_name, pattern) in &crud.relationships {
            let rel = graph
                .relationship(&LocalName::new(rel_name.as_str()))
                .ok_or_else(|| AgentlangError::NotFound(format!("relationship {rel_name}")))?;

            let (child_fq, child_schema) = self.registry.resolve_record(&env.active_module, rel.to.as_str())?;
            let Some(resolver) = self.resolvers.resolver_for(&child_fq) else { continue };
            let breaker = self.breaker_for(&self.resolvers.resolver_name_for(&child_fq));
            let auth_info = auth_info_for(auth, env);

            let mut extra_query: Vec<(String, Value, QueryOp)> = Vec::new();
            let first_pattern = match pattern {
                RelationshipPattern::Single(p) => Some(p.as_ref()),
                RelationshipPattern::List(ps) => ps.first(),
            };
            if let Some(Pattern::Crud(inner)) = first_pattern {
                for slot in &inner.attributes {
                    let value = expr::eval(&slot.value, env, None, &self.functions)?;
                    extra_query.push((slot.name.clone(), value, slot.query_op.unwrap_or(QueryOp::Eq)));
                }
            }

            for parent in parents.iter_mut() {
                let children = if rel.is_contains() {
                    let Some(parent_path) = parent.path.clone() else { continue };
                    let query = Instance::with_query(child_fq.clone(), Vec::new(), extra_query.clone());
                    policy::call_with_policy(&self.config.policy, &breaker, || {
                        let resolver = Arc::clone(&resolver);
                        let auth_info = auth_info.clone();
                        let query = query.clone();
                        let parent_path = parent_path.clone();
                        async move { resolver.query_child_instances(&auth_info, &parent_path, &query).await }
                    })
                    .await?
                } else if rel.requires_link_record() {
                    let query = Instance::with_query(child_fq.clone(), Vec::new(), extra_query.clone());
                    let connected = parent.clone();
                    let rel_name_owned = rel_name.clone();
                    policy::call_with_policy(&self.config.policy, &breaker, || {
                        let resolver = Arc::clone(&resolver);
                        let auth_info = auth_info.clone();
                        let query = query.clone();
                        let connected = connected.clone();
                        let rel_name_owned = rel_name_owned.clone();
                        async move {
                            resolver
                                .query_connected_instances(&auth_info, &rel_name_owned, &connected, &query)
                                .await
                        }
                    })
                    .await?
                } else {
                    let Some(fk_attr) = scalar_reference_attribute(&child_schema, parent_fq.name.as_str()) else {
                        continue;
                    };
                    let parent_id = parent.get(&parent_id_attr).cloned().unwrap_or(Value::Null);
                    let mut query_attrs = extra_query.clone();
                    query_attrs.push((fk_attr.to_string(), parent_id, QueryOp::Eq));
                    let query = Instance::with_query(child_fq.clone(), Vec::new(), query_attrs);
                    policy::call_with_policy(&self.config.policy, &breaker, || {
                        let resolver = Arc::clone(&resolver);
                        let auth_info = auth_info.clone();
                        let query = query.clone();
                        async move { resolver.query_instances(&auth_info, &query).await }
                    })
                    .await?
                };

                let visible = rbac_gate::filter_readable(&child_schema.rbac, children.iter(), auth, env)?;
                for child in visible {
                    parent.attach_related(rel_name.clone(), child.clone());
                }
            }
        }
        Ok(())
    }
}

impl Evaluator {
    /// Looks up the active user's roles in the `auth` core module's
    /// `UserRole` entity, through this same evaluator but in a
    /// kernel-mode environment so the lookup doesn't recurse back into
    /// RBAC (spec.md §4.8, §5). Role/permission data lives as regular
    /// entities the same as anything else the core evaluates; a
    /// deployment with no `auth` module loaded, or with
    /// `EngineConfig::auth_enabled` turned off, gets an unconditional
    /// admin bypass rather than a hard failure.
    async fn lookup_auth_context(&self, user_id: &str) -> AuthContext {
        let mut ctx = AuthContext { user_id: user_id.to_string(), roles: Vec::new(), is_admin: false };
        if !self.config.auth_enabled {
            ctx.is_admin = true;
            return ctx;
        }
        let auth_module = ModuleName::new("auth");
        if self.registry.module(&auth_module).is_none() {
            return ctx;
        }

        let mut kernel_env = Environment::root("AuthLookup", auth_module, user_id.to_string());
        kernel_env.mode.kernel = true;
        let query = CrudMap {
            entity: "UserRole".into(),
            query_all: false,
            attributes: vec![AttributeSlot {
                name: "userId".into(),
                value: Expr::Str(user_id.to_string()),
                query_op: Some(QueryOp::Eq),
            }],
            relationships: vec![],
            hints: Hints::default(),
        };
        if let Ok(Outcome::Instances(rows)) = self.eval_crud(&query, &mut kernel_env, &ctx).await {
            for row in rows {
                if let Some(Value::Str(role)) = row.get("role").cloned() {
                    ctx.roles.push(role);
                }
            }
        }
        ctx.is_admin = ctx.roles.iter().any(|r| r == "admin");
        ctx
    }
}

#[async_trait]
impl WorkflowExecutor for Evaluator {
    async fn execute(&self, workflow: &LocalName, instance: &Instance) -> Result<Instance> {
        tracing::info!(workflow = %workflow, entity = %instance.fq_name, "workflow entered");
        let workflow_def = self.registry.resolve_workflow(&instance.fq_name.module, workflow.as_str())?;
        let user_id = instance.auth_context.clone().unwrap_or_default();
        let mut env = Environment::root(workflow.as_str().to_string(), instance.fq_name.module.clone(), user_id.clone());
        env.bind("self", instance_to_value(instance));
        // spec.md §4.7: also bound under the entity's simple name, so
        // `E.id`/`EF.mode`-style references inside the workflow resolve.
        env.bind(instance.fq_name.name.as_str(), instance_to_value(instance));
        let auth = self.lookup_auth_context(&user_id).await;
        let mut kernel_env = Environment::child(&env, env.event_name.clone());
        kernel_env.mode.kernel = true;

        // Invariant 5 (spec.md §3): a workflow that raises an uncaught
        // exception rolls back every resolver transaction it opened; a
        // workflow whose @catch handles the exception commits normally.
        // `run_workflow` only ever returns `Err` once `eval_statement`'s
        // own `@catch` handling has given up, so any error here is by
        // definition uncaught.
        match self.run_workflow(&workflow_def, &mut kernel_env, &auth).await {
            Ok(_) => {
                env.commit_all().await?;
                tracing::info!(workflow = %workflow, "workflow exited");
                Ok(instance.clone())
            }
            Err(err) => {
                env.rollback_all().await?;
                tracing::warn!(workflow = %workflow, error = %err, "workflow exited with an uncaught error");
                Err(err)
            }
        }
    }
}

fn bind_alias(alias: &AliasBinding, value: &Value, env: &mut Environment) {
    match alias {
        AliasBinding::None => {}
        AliasBinding::Name(name) => env.bind(name.clone(), value.clone()),
        AliasBinding::Destructure(slots) => {
            let Value::Array(items) = value else {
                return;
            };
            let mut idx = 0;
            for slot in slots {
                match slot {
                    DestructureSlot::Skip => idx += 1,
                    DestructureSlot::Bind(name) => {
                        env.bind(name.clone(), items.get(idx).cloned().unwrap_or(Value::Null));
                        idx += 1;
                    }
                    DestructureSlot::Rest(name) => {
                        env.bind(name.clone(), Value::Array(items[idx.min(items.len())..].to_vec()));
                    }
                }
            }
        }
    }
}

/// `__path__` construction (spec.md §3, §4.4.1, Invariant 1): a root
/// instance (no enclosing Contains relationship) gets
/// `/<ModuleName>/<EntityName>/<id>`; an instance created underneath a
/// Contains relationship gets `<parent>/<RelName>/<ChildEntity>/<id>`.
/// A Between relationship carries no path nesting of its own — its
/// child is addressed exactly as a root instance would be.
fn build_path(env: &Environment, module: &ModuleName, entity: &str, id: &Value) -> String {
    match (&env.parent_path, &env.contains_relationship) {
        (Some(parent), Some(rel)) => format!("{parent}/{rel}/{entity}/{id}"),
        _ => format!("/{module}/{entity}/{id}"),
    }
}

/// The child-side attribute realizing a one-to-one/one-to-many Between
/// relationship as a scalar foreign key — the attribute declared
/// `ref(<parent_entity>.<attr>)` (spec.md §3's `Reference` attribute
/// type, reused here rather than inventing a separate naming
/// convention for Between relationships).
fn scalar_reference_attribute<'a>(schema: &'a RecordSchema, parent_entity: &str) -> Option<&'a str> {
    schema.attributes.iter().find_map(|a| match &a.attr_type {
        AttributeType::Reference { entity, .. } if entity == parent_entity => Some(a.name.as_str()),
        _ => None,
    })
}

fn upsert_attr(attrs: &mut Vec<(String, Value)>, name: &str, value: Value) {
    if let Some(slot) = attrs.iter_mut().find(|(n, _)| n == name) {
        slot.1 = value;
    } else {
        attrs.push((name.to_string(), value));
    }
}

fn auth_info_for(auth: &AuthContext, env: &Environment) -> AuthInfo {
    let mut info = AuthInfo::new(auth.user_id.clone());
    info.read_for_update = env.mode.upsert;
    info.read_for_delete = env.mode.delete;
    info
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect())
        }
    }
}

fn dedupe_instances(instances: &mut Vec<Instance>, columns: &[String]) {
    let mut seen: Vec<Vec<Value>> = Vec::new();
    instances.retain(|inst| {
        let key: Vec<Value> = if columns.is_empty() {
            inst.attributes.iter().map(|(_, v)| v.clone()).collect()
        } else {
            columns.iter().map(|c| inst.get(c).cloned().unwrap_or(Value::Null)).collect()
        };
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}

impl EventOperation {
    pub fn label(self) -> &'static str {
        match self {
            EventOperation::Created => "created",
            EventOperation::Updated => "updated",
            EventOperation::Deleted => "deleted",
        }
    }
}
