// The execution graph: an optional compiled tier for running a
// workflow (spec.md §4.9).
//
// `evaluator::run_workflow` walks a `WorkflowDefinition`'s statements
// with Rust's own call stack: `IF`/`FOR-EACH` recurse through
// `eval_pattern`, and a `SUSPEND` statement simply returns an error.
// That is enough for a workflow that never pauses mid-flight, but it
// gives the caller nothing to resume *from* — the call stack that was
// mid-walk when the suspension happened is gone the moment the `Err`
// unwinds.
//
// This module compiles a workflow into a tree of nodes first, then
// walks that tree with an explicit `Vec<Frame>` stack the walker owns
// itself rather than Rust's. A suspension is just that stack, cloned
// out into a `Suspension` value the caller can hand to an external
// scheduler and feed back into `resume` later (spec.md §4.9, "the
// state machine supports pause/resume, which is the basis for
// SUSPEND"). `Pattern::If`/`Pattern::ForEach` compile down to
// `GraphNode::If`/`GraphNode::ForEach` sub-graphs; every other pattern
// kind — including `EVENT`, `RETURN`, `SUSPEND`, and agent-typed steps
// — is already a single transactional unit as far as resumability is
// concerned, so it compiles to a `GraphNode::Leaf` and runs through
// the same `Evaluator::eval_statement` the direct interpreter uses.
//
// A `Suspension` does not carry an `Environment`: an environment holds
// live `Arc<dyn Resolver>` handles that cannot be serialized, so
// resuming a walk is the caller's job — hand `resume` the same (or an
// equivalent, freshly rehydrated) environment the walk started with.
// This is spec.md §4.9's own framing of pause/resume as an external
// scheduler/storage concern rather than a core one.
//
// Grounded on the teacher's `WorkflowDefinition` graph helpers
// (`incoming_states`/`outgoing_states`, a DFS walk over a flat place
// graph) generalized from a flat graph to this node/sub-graph tree,
// and on `engine::functions`'s `ChainExecution`/`ChainStatus` idiom
// (`Running`/`Completed`/`Failed`/`PartiallyCompleted`) for
// `GraphStatus`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AgentlangError, Result};
use crate::models::pattern::{AliasBinding, Expr, Pattern, Statement};
use crate::models::{Value, WorkflowDefinition};

use super::environment::Environment;
use super::evaluator::Evaluator;
use super::expr;
use super::rbac_gate::AuthContext;

/// One node of a compiled workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphNode {
    /// A statement with no sub-graph of its own: evaluated in one shot
    /// through `Evaluator::eval_statement`. Covers `EVENT`, `RETURN`,
    /// `SUSPEND`, `DELETE`/`PURGE`, and agent-typed steps alike — each
    /// is already atomic from the walker's point of view.
    Leaf(Statement),
    If {
        condition: Expr,
        alias: AliasBinding,
        consequent: Graph,
        alternate: Option<Graph>,
    },
    ForEach {
        source: Box<Pattern>,
        binding: String,
        alias: AliasBinding,
        body: Graph,
    },
}

pub type Graph = Vec<GraphNode>;

/// Compiles a workflow's top-level statements into a graph (spec.md
/// §4.9). Sub-graphs are compiled recursively; nothing here talks to
/// an environment or a resolver.
pub fn compile(workflow: &WorkflowDefinition) -> Graph {
    compile_statements(&workflow.statements)
}

fn compile_statements(statements: &[Statement]) -> Graph {
    statements.iter().map(compile_statement).collect()
}

fn compile_statement(stmt: &Statement) -> GraphNode {
    match &stmt.pattern {
        Pattern::If { condition, then_branch, else_branch } => GraphNode::If {
            condition: condition.clone(),
            alias: stmt.alias.clone(),
            consequent: compile_statements(then_branch),
            alternate: else_branch.as_ref().map(|b| compile_statements(b)),
        },
        Pattern::ForEach { source, binding, body } => GraphNode::ForEach {
            source: source.clone(),
            binding: binding.clone(),
            alias: stmt.alias.clone(),
            body: compile_statements(body),
        },
        _ => GraphNode::Leaf(stmt.clone()),
    }
}

/// One level of the walker's explicit state stack: the sub-graph
/// currently being walked, how far into it we are, and (for a
/// `FOR-EACH` frame) the loop's own progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    graph: Graph,
    index: usize,
    loop_state: Option<LoopState>,
    /// Bindings as they stood just before this frame's body started,
    /// restored once the frame completes so a branch/loop-local
    /// rebinding doesn't leak into the enclosing scope (spec.md §8
    /// scenario 6). `None` for the outermost frame, which shares the
    /// caller's own scope.
    scope: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoopState {
    binding: String,
    alias: AliasBinding,
    remaining: Vec<Value>,
    results: Vec<Value>,
}

/// A paused walk (spec.md §4.9, "return `[partialResult,
/// suspensionId]`"). Holds the frame stack as it stood the moment
/// `SUSPEND` evaluated, plus the id the `SUSPEND` statement minted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suspension {
    pub id: String,
    stack: Vec<Frame>,
}

/// Outcome of a walk (spec.md §4.9 state table; status names echo the
/// teacher's `ChainStatus`).
#[derive(Debug, Clone)]
pub enum GraphStatus {
    Completed(Value),
    Suspended(Suspension),
}

/// Walks a freshly compiled graph to completion or the first
/// suspension.
pub async fn walk(evaluator: &Evaluator, graph: Graph, env: &mut Environment, auth: &AuthContext) -> Result<GraphStatus> {
    let stack = vec![Frame { graph, index: 0, loop_state: None, scope: None }];
    run(evaluator, stack, env, auth).await
}

/// Resumes a previously suspended walk in a (possibly freshly
/// constructed) environment.
pub async fn resume(
    evaluator: &Evaluator,
    suspension: Suspension,
    env: &mut Environment,
    auth: &AuthContext,
) -> Result<GraphStatus> {
    run(evaluator, suspension.stack, env, auth).await
}

/// The iterative walker itself: pops/pushes `Frame`s instead of
/// recursing, so a `SUSPEND` mid-`FOR-EACH` can hand back the whole
/// stack rather than unwinding it.
async fn run(evaluator: &Evaluator, mut stack: Vec<Frame>, env: &mut Environment, auth: &AuthContext) -> Result<GraphStatus> {
    let mut last = Value::Null;

    loop {
        let Some(frame) = stack.last_mut() else {
            return Ok(GraphStatus::Completed(last));
        };

        if frame.index >= frame.graph.len() {
            if let Some(state) = frame.loop_state.as_mut() {
                state.results.push(last.clone());
                if state.remaining.is_empty() {
                    let results = std::mem::take(&mut state.results);
                    let alias = state.alias.clone();
                    last = Value::Array(results);
                    let scope = frame.scope.take();
                    stack.pop();
                    if let Some(scope) = scope {
                        env.restore_bindings(scope);
                    }
                    bind_result(&alias, &last, env);
                } else {
                    let next = state.remaining.remove(0);
                    env.bind(state.binding.clone(), next);
                    frame.index = 0;
                }
                continue;
            }
            let scope = frame.scope.take();
            stack.pop();
            if let Some(scope) = scope {
                env.restore_bindings(scope);
            }
            if stack.is_empty() {
                return Ok(GraphStatus::Completed(last));
            }
            continue;
        }

        let node = frame.graph[frame.index].clone();
        frame.index += 1;

        match node {
            GraphNode::Leaf(stmt) => {
                let is_suspend = matches!(stmt.pattern, Pattern::Suspend(_));
                match evaluator.eval_statement(&stmt, env, auth).await {
                    Ok(value) => {
                        last = value;
                        if env.return_pending {
                            return Ok(GraphStatus::Completed(last));
                        }
                    }
                    Err(AgentlangError::SuspensionRequested(id)) if is_suspend => {
                        return Ok(GraphStatus::Suspended(Suspension { id, stack }));
                    }
                    Err(err) => return Err(err),
                }
            }
            GraphNode::If { condition, alias, consequent, alternate } => {
                let cond = expr::eval(&condition, env, None, evaluator.functions())?;
                let branch = if cond.is_truthy() { Some(consequent) } else { alternate };
                match branch {
                    Some(body) if !body.is_empty() => {
                        let scope = env.snapshot_bindings();
                        stack.push(Frame { graph: body, index: 0, loop_state: None, scope: Some(scope) });
                    }
                    _ => {
                        last = Value::Null;
                        bind_result(&alias, &last, env);
                    }
                }
            }
            GraphNode::ForEach { source, binding, alias, body } => {
                let probe = Statement { pattern: (*source).clone(), alias: AliasBinding::None };
                let source_value = evaluator.eval_statement(&probe, env, auth).await?;
                let items = match source_value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                if items.is_empty() {
                    last = Value::Array(Vec::new());
                    bind_result(&alias, &last, env);
                } else {
                    let mut remaining = items;
                    let first = remaining.remove(0);
                    let scope = env.snapshot_bindings();
                    env.bind(binding.clone(), first);
                    stack.push(Frame {
                        graph: body,
                        index: 0,
                        loop_state: Some(LoopState { binding, alias, remaining, results: Vec::new() }),
                        scope: Some(scope),
                    });
                }
            }
        }
    }
}

fn bind_result(alias: &AliasBinding, value: &Value, env: &mut Environment) {
    if let AliasBinding::Name(name) = alias {
        env.bind(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::resolver::InMemoryResolver;
    use crate::engine::resolver_registry::ResolverRegistry;
    use crate::engine::triggers::EventBus;
    use crate::models::module::Module;
    use crate::models::ModuleName;
    use std::sync::Arc;

    fn setup() -> Evaluator {
        let registry = Arc::new(crate::models::module::ModuleRegistry::new());
        let module = Module::new("Acme");
        registry.load_module(module);
        let resolvers = Arc::new(ResolverRegistry::new(Arc::new(InMemoryResolver::new())));
        Evaluator::new(registry, resolvers, Arc::new(EventBus::new()), EngineConfig::default())
    }

    fn int_stmt(n: i64) -> Statement {
        Statement { pattern: Pattern::Expr(Expr::Int(n)), alias: AliasBinding::None }
    }

    fn auth() -> AuthContext {
        AuthContext { user_id: "u1".into(), roles: vec!["admin".into()], is_admin: true }
    }

    #[test]
    fn compiling_a_flat_workflow_yields_one_leaf_per_statement() {
        let workflow = WorkflowDefinition::new("Flat")
            .with_statement(int_stmt(1))
            .with_statement(int_stmt(2));
        let graph = compile(&workflow);
        assert_eq!(graph.len(), 2);
        assert!(matches!(graph[0], GraphNode::Leaf(_)));
    }

    #[tokio::test]
    async fn walking_a_flat_graph_completes_with_the_last_statement_value() {
        let eval = setup();
        let workflow = WorkflowDefinition::new("Flat")
            .with_statement(int_stmt(1))
            .with_statement(int_stmt(42));
        let graph = compile(&workflow);
        let mut env = Environment::root("Flat", ModuleName::new("Acme"), "u1");
        let status = walk(&eval, graph, &mut env, &auth()).await.unwrap();
        match status {
            GraphStatus::Completed(Value::Int(n)) => assert_eq!(n, 42),
            other => panic!("expected completion with 42, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn walking_an_if_graph_enters_the_matching_sub_graph() {
        let eval = setup();
        let workflow = WorkflowDefinition::new("Branch").with_statement(Statement {
            pattern: Pattern::If {
                condition: Expr::Bool(true),
                then_branch: vec![int_stmt(1)],
                else_branch: Some(vec![int_stmt(0)]),
            },
            alias: AliasBinding::None,
        });
        let graph = compile(&workflow);
        let mut env = Environment::root("Branch", ModuleName::new("Acme"), "u1");
        let status = walk(&eval, graph, &mut env, &auth()).await.unwrap();
        match status {
            GraphStatus::Completed(Value::Int(n)) => assert_eq!(n, 1),
            other => panic!("expected completion with 1, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn suspending_mid_walk_yields_a_resumable_suspension() {
        let eval = setup();
        let workflow = WorkflowDefinition::new("Pausing")
            .with_statement(int_stmt(7))
            .with_statement(Statement {
                pattern: Pattern::Suspend(Box::new(Pattern::Expr(Expr::Str("waiting".into())))),
                alias: AliasBinding::None,
            });
        let graph = compile(&workflow);
        let mut env = Environment::root("Pausing", ModuleName::new("Acme"), "u1");
        let status = walk(&eval, graph, &mut env, &auth()).await.unwrap();
        match status {
            GraphStatus::Suspended(suspension) => assert!(!suspension.id.is_empty()),
            other => panic!("expected a suspension, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn an_empty_for_each_source_completes_with_an_empty_array() {
        let eval = setup();
        let workflow = WorkflowDefinition::new("Loop").with_statement(Statement {
            pattern: Pattern::ForEach {
                source: Box::new(Pattern::Expr(Expr::Array(vec![]))),
                binding: "item".into(),
                body: vec![int_stmt(1)],
            },
            alias: AliasBinding::None,
        });
        let graph = compile(&workflow);
        let mut env = Environment::root("Loop", ModuleName::new("Acme"), "u1");
        let status = walk(&eval, graph, &mut env, &auth()).await.unwrap();
        match status {
            GraphStatus::Completed(Value::Array(items)) => assert!(items.is_empty()),
            other => panic!("expected an empty array, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_for_each_over_two_items_collects_both_iteration_results() {
        let eval = setup();
        let workflow = WorkflowDefinition::new("Loop").with_statement(Statement {
            pattern: Pattern::ForEach {
                source: Box::new(Pattern::Expr(Expr::Array(vec![Expr::Int(1), Expr::Int(2)]))),
                binding: "item".into(),
                body: vec![Statement {
                    pattern: Pattern::Expr(Expr::Ident("item".into())),
                    alias: AliasBinding::None,
                }],
            },
            alias: AliasBinding::Name("results".into()),
        });
        let graph = compile(&workflow);
        let mut env = Environment::root("Loop", ModuleName::new("Acme"), "u1");
        let status = walk(&eval, graph, &mut env, &auth()).await.unwrap();
        match status {
            GraphStatus::Completed(Value::Array(items)) => {
                assert_eq!(items, vec![Value::Int(1), Value::Int(2)]);
                assert_eq!(env.lookup("results"), Some(&Value::Array(vec![Value::Int(1), Value::Int(2)])));
            }
            other => panic!("expected two collected results, got {other:?}"),
        }
    }
}
