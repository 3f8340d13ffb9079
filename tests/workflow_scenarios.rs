// End-to-end scenarios exercising the evaluator the way a host would:
// through `Module`/`ModuleRegistry` registration and `Evaluator`
// entry points only, never reaching into `engine` internals.

use std::sync::Arc;

use agentlang_core::config::EngineConfig;
use agentlang_core::engine::evaluator::Outcome;
use agentlang_core::engine::resolver::InMemoryResolver;
use agentlang_core::engine::resolver_registry::ResolverRegistry;
use agentlang_core::engine::triggers::EventBus;
use agentlang_core::engine::{AuthContext, Environment, Evaluator};
use agentlang_core::models::module::Module;
use agentlang_core::models::pattern::{
    AliasBinding, AttributeSlot, CrudMap, Expr, Hints, IntoProjection, JoinClause, JoinKind, Pattern,
    RelationshipPattern, Statement,
};
use agentlang_core::models::rbac::{Operation, RbacRule, WhereClause, WhereRhs};
use agentlang_core::models::schema::{AttributeSchema, AttributeType, DefaultSpec, RecordKind};
use agentlang_core::models::{FqName, ModuleName, QueryOp, RecordSchema, RelationshipSchema, Value, WorkflowDefinition};

fn evaluator(module: Module) -> Evaluator {
    let registry = Arc::new(agentlang_core::models::module::ModuleRegistry::new());
    registry.load_module(module);
    let resolvers = Arc::new(ResolverRegistry::new(Arc::new(InMemoryResolver::new())));
    Evaluator::new(registry, resolvers, Arc::new(EventBus::new()), EngineConfig::default())
}

fn admin_auth() -> AuthContext {
    AuthContext { user_id: "admin".into(), roles: vec!["admin".into()], is_admin: true }
}

fn crud_set(entity: &str, attrs: Vec<(&str, Expr)>) -> CrudMap {
    CrudMap {
        entity: entity.into(),
        query_all: false,
        attributes: attrs
            .into_iter()
            .map(|(name, value)| AttributeSlot { name: name.into(), value, query_op: None })
            .collect(),
        relationships: Vec::new(),
        hints: Hints::default(),
    }
}

fn crud_eq(entity: &str, attr: &str, value: Expr) -> CrudMap {
    CrudMap {
        entity: entity.into(),
        query_all: false,
        attributes: vec![AttributeSlot { name: attr.into(), value, query_op: Some(QueryOp::Eq) }],
        relationships: Vec::new(),
        hints: Hints::default(),
    }
}

/// Scenario 1 (spec.md §8): a CRUD create followed by a query round
/// trips the created instance back out unchanged.
#[tokio::test]
async fn crud_create_then_query_round_trips() {
    let mut module = Module::new("Acme");
    module.add_record(
        RecordSchema::new("Customer", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("name", AttributeType::String)),
    );
    let eval = evaluator(module);
    let mut env = Environment::root("Seed", ModuleName::new("Acme"), "admin");
    let auth = admin_auth();

    eval.eval_crud(&crud_set("Customer", vec![("id", Expr::Int(1)), ("name", Expr::Str("Joe".into()))]), &mut env, &auth)
        .await
        .unwrap();

    let outcome = eval.eval_crud(&crud_eq("Customer", "id", Expr::Int(1)), &mut env, &auth).await.unwrap();
    match outcome {
        Outcome::Instances(found) => {
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].get("name"), Some(&Value::Str("Joe".into())));
        }
        other => panic!("expected instances, got {other:?}"),
    }
}

/// Scenario 2 (spec.md §4.5, §8): an `@expr` attribute recomputes from
/// its dependencies on create, in declaration order, without the
/// caller supplying it.
#[tokio::test]
async fn expression_attributes_recompute_on_create() {
    let mut module = Module::new("Acme");
    module.add_record(
        RecordSchema::new("LineItem", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("qty", AttributeType::Int))
            .with_attribute(AttributeSchema::new("unitPrice", AttributeType::Number))
            .with_attribute(AttributeSchema::new("total", AttributeType::Number).expr("qty * unitPrice")),
    );
    let eval = evaluator(module);
    let mut env = Environment::root("Seed", ModuleName::new("Acme"), "admin");
    let auth = admin_auth();

    let outcome = eval
        .eval_crud(
            &crud_set(
                "LineItem",
                vec![("id", Expr::Int(1)), ("qty", Expr::Int(3)), ("unitPrice", Expr::Number(9.5))],
            ),
            &mut env,
            &auth,
        )
        .await
        .unwrap();

    match outcome {
        Outcome::Instances(created) => {
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].get("total"), Some(&Value::Number(28.5)));
        }
        other => panic!("expected instances, got {other:?}"),
    }
}

/// Scenario 3 (spec.md §4.8, §8): a `where`-clause RBAC rule limits a
/// non-admin session to rows it owns; a disallowed write is rejected
/// outright rather than silently filtered.
#[tokio::test]
async fn rbac_where_clause_scopes_reads_and_rejects_writes() {
    let mut schema = RecordSchema::new("Note", RecordKind::Entity)
        .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
        .with_attribute(AttributeSchema::new("ownerId", AttributeType::String))
        .with_attribute(AttributeSchema::new("text", AttributeType::String));
    schema.rbac.push(RbacRule::new(vec!["*".into()], vec![Operation::Create]));
    schema.rbac.push(
        RbacRule::new(vec!["*".into()], vec![Operation::Read, Operation::Update]).with_where(WhereClause::Equals {
            this_attr: "ownerId".into(),
            rhs: WhereRhs::AuthField("user_id".into()),
        }),
    );
    let mut module = Module::new("Acme");
    module.add_record(schema);
    let eval = evaluator(module);
    let mut env = Environment::root("Seed", ModuleName::new("Acme"), "admin");

    eval.eval_crud(
        &crud_set("Note", vec![("id", Expr::Int(1)), ("ownerId", Expr::Str("alice".into())), ("text", Expr::Str("mine".into()))]),
        &mut env,
        &admin_auth(),
    )
    .await
    .unwrap();
    eval.eval_crud(
        &crud_set("Note", vec![("id", Expr::Int(2)), ("ownerId", Expr::Str("bob".into())), ("text", Expr::Str("not mine".into()))]),
        &mut env,
        &admin_auth(),
    )
    .await
    .unwrap();

    let alice = AuthContext { user_id: "alice".into(), roles: vec!["member".into()], is_admin: false };

    let outcome = eval.eval_crud(&CrudMap { entity: "Note".into(), query_all: true, ..crud_eq("Note", "id", Expr::Int(1)) }, &mut env, &alice)
        .await
        .unwrap();
    match outcome {
        Outcome::Instances(visible) => assert_eq!(visible.len(), 1, "alice should only see her own note"),
        other => panic!("expected instances, got {other:?}"),
    }

    let denied = eval
        .eval_crud(
            &CrudMap {
                entity: "Note".into(),
                query_all: false,
                attributes: vec![
                    AttributeSlot { name: "id".into(), value: Expr::Int(2), query_op: Some(QueryOp::Eq) },
                    AttributeSlot { name: "text".into(), value: Expr::Str("hacked".into()), query_op: None },
                ],
                relationships: Vec::new(),
                hints: Hints::default(),
            },
            &mut env,
            &alice,
        )
        .await;
    assert!(matches!(denied, Err(agentlang_core::error::AgentlangError::Unauthorised(_))));
}

/// Scenario 4 (spec.md §4.7, §4.4 item 5, §8): creating a parent with
/// a nested `contains` child wires the child's path under the
/// parent's, and purging the parent cascades to the child.
#[tokio::test]
async fn cascade_purge_removes_contained_children() {
    let mut module = Module::new("Acme");
    module.add_record(
        RecordSchema::new("Order", RecordKind::Entity).with_attribute(AttributeSchema::new("id", AttributeType::Int).id()),
    );
    module.add_record(
        RecordSchema::new("OrderItem", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("sku", AttributeType::String)),
    );
    module.add_relationship(RelationshipSchema::contains("Items", "Order", "OrderItem"));
    let eval = evaluator(module);
    let mut env = Environment::root("Seed", ModuleName::new("Acme"), "admin");
    let auth = admin_auth();

    let create_order = CrudMap {
        entity: "Order".into(),
        query_all: false,
        attributes: vec![AttributeSlot { name: "id".into(), value: Expr::Int(1), query_op: None }],
        relationships: vec![(
            "Items".into(),
            RelationshipPattern::List(vec![Pattern::Crud(crud_set("OrderItem", vec![("id", Expr::Int(1)), ("sku", Expr::Str("widget".into()))]))]),
        )],
        hints: Hints::default(),
    };
    eval.eval_crud(&create_order, &mut env, &auth).await.unwrap();

    let before = eval.eval_crud(&CrudMap { query_all: true, ..crud_eq("OrderItem", "id", Expr::Int(1)) }, &mut env, &auth).await.unwrap();
    match before {
        Outcome::Instances(items) => assert_eq!(items.len(), 1),
        other => panic!("expected the seeded item, got {other:?}"),
    }

    eval.eval_delete(
        &CrudMap { query_all: false, ..crud_eq("Order", "id", Expr::Int(1)) },
        true,
        &mut env,
        &auth,
    )
    .await
    .unwrap();

    let after = eval.eval_crud(&CrudMap { query_all: true, ..crud_eq("OrderItem", "id", Expr::Int(1)) }, &mut env, &auth).await.unwrap();
    match after {
        Outcome::Instances(items) => assert!(items.is_empty(), "cascade purge should remove the contained item"),
        other => panic!("expected no items, got {other:?}"),
    }
}

/// Scenario 5 (spec.md §4.4 item 4, §8): an inner join with a `@groupBy`
/// sum aggregates correctly per group.
#[tokio::test]
async fn join_and_group_by_sum_aggregates_per_customer() {
    let mut module = Module::new("Acme");
    module.add_record(
        RecordSchema::new("Customer", RecordKind::Entity).with_attribute(AttributeSchema::new("id", AttributeType::Int).id()),
    );
    module.add_record(
        RecordSchema::new("Order", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("customerId", AttributeType::Int))
            .with_attribute(AttributeSchema::new("amount", AttributeType::Number)),
    );
    let eval = evaluator(module);
    let mut env = Environment::root("Seed", ModuleName::new("Acme"), "admin");
    let auth = admin_auth();

    eval.eval_crud(&crud_set("Customer", vec![("id", Expr::Int(1))]), &mut env, &auth).await.unwrap();
    eval.eval_crud(&crud_set("Customer", vec![("id", Expr::Int(2))]), &mut env, &auth).await.unwrap();
    for (id, customer, amount) in [(1, 1, 10.0), (2, 1, 15.0), (3, 2, 5.0)] {
        eval.eval_crud(
            &crud_set(
                "Order",
                vec![("id", Expr::Int(id)), ("customerId", Expr::Int(customer)), ("amount", Expr::Number(amount))],
            ),
            &mut env,
            &auth,
        )
        .await
        .unwrap();
    }

    let query = CrudMap {
        entity: "Customer".into(),
        query_all: true,
        attributes: Vec::new(),
        relationships: Vec::new(),
        hints: Hints {
            joins: vec![JoinClause {
                kind: JoinKind::Inner,
                entity: "Order".into(),
                on_attribute: "id".into(),
                on_reference: Expr::Reference(vec!["Order".into(), "customerId".into()]),
            }],
            into: vec![IntoProjection::Sum { alias: "total".into(), reference: Expr::Reference(vec!["Order".into(), "amount".into()]) }],
            group_by: vec!["Customer.id".into()],
            ..Default::default()
        },
    };

    let outcome = eval.eval_crud(&query, &mut env, &auth).await.unwrap();
    match outcome {
        Outcome::Value(Value::Array(rows)) => {
            let totals: Vec<f64> = rows
                .into_iter()
                .map(|row| match row {
                    Value::Map(map) => match map.get("total") {
                        Some(Value::Number(n)) => *n,
                        _ => panic!("expected a numeric total"),
                    },
                    other => panic!("expected a row map, got {other:?}"),
                })
                .collect();
            assert!(totals.contains(&25.0));
            assert!(totals.contains(&5.0));
        }
        other => panic!("expected a value array, got {other:?}"),
    }
}

/// Scenario 6 (spec.md §4.4 items 6-7, §8): a block-structured
/// if/else runs the matching branch in its own child scope, and an
/// alias bound inside a branch doesn't leak back out to the parent.
#[tokio::test]
async fn if_else_runs_matching_branch_with_scoped_aliases() {
    let module = Module::new("Acme");
    let eval = evaluator(module);
    let mut env = Environment::root("Check", ModuleName::new("Acme"), "admin");
    let auth = admin_auth();

    let workflow = Pattern::If {
        condition: Expr::BinOp(
            agentlang_core::models::pattern::BinOp::Gt,
            Box::new(Expr::Int(10)),
            Box::new(Expr::Int(5)),
        ),
        then_branch: vec![Statement { pattern: Pattern::Expr(Expr::Str("big".into())), alias: AliasBinding::Name("branchLabel".into()) }],
        else_branch: Some(vec![Statement { pattern: Pattern::Expr(Expr::Str("small".into())), alias: AliasBinding::Name("branchLabel".into()) }]),
    };
    let statement = Statement { pattern: workflow, alias: AliasBinding::Name("result".into()) };

    let value = eval.eval_statement(&statement, &mut env, &auth).await.unwrap();
    assert_eq!(value, Value::Str("big".into()));
    assert_eq!(env.lookup("result"), Some(&Value::Str("big".into())));
    assert!(env.lookup("branchLabel").is_none(), "alias bound inside the branch must not leak into the parent scope");
}

/// Named workflows execute end to end via `Evaluator::execute`
/// (the `WorkflowExecutor` entry a trigger or host calls), committing
/// on success (spec.md §4.6, §8).
#[tokio::test]
async fn named_workflow_executes_and_commits() {
    let mut module = Module::new("Acme");
    module.add_record(
        RecordSchema::new("Customer", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("name", AttributeType::String))
            .with_attribute(AttributeSchema::new("createdAt", AttributeType::String).default_value(DefaultSpec::Now)),
    );
    module.add_workflow(WorkflowDefinition::new("CreateCustomer").with_statement(Statement {
        pattern: Pattern::Crud(crud_set("Customer", vec![("id", Expr::Int(1)), ("name", Expr::Str("Joe".into()))])),
        alias: AliasBinding::None,
    }));
    let eval = evaluator(module);

    let mut event = agentlang_core::models::Instance::new(FqName::new("Acme", "CreateCustomerEvent"), vec![]);
    event.auth_context = Some("admin".into());

    let executed = agentlang_core::engine::WorkflowExecutor::execute(&eval, &agentlang_core::models::LocalName::new("CreateCustomer"), &event)
        .await
        .unwrap();
    assert_eq!(executed.fq_name, event.fq_name);

    let mut verify_env = Environment::root("Verify", ModuleName::new("Acme"), "admin");
    let found = eval.eval_crud(&crud_eq("Customer", "id", Expr::Int(1)), &mut verify_env, &admin_auth()).await.unwrap();
    match found {
        Outcome::Instances(rows) => assert_eq!(rows.len(), 1),
        other => panic!("expected the committed row, got {other:?}"),
    }
}
