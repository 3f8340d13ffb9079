// The Agentlang engine: the evaluator and everything it leans on to
// run a workflow against a resolver.
//
// The engine is the layer between the data model (`crate::models`,
// pure data with no behaviour) and the outside world (a resolver
// backing an entity, a host that invokes an agent). Nothing in
// `models` talks to a resolver or evaluates a pattern; everything
// here does.
//
// ## Engine components
//
// - `evaluator`  — the pattern interpreter (spec.md §4.4, §4.9)
// - `environment` — the per-call/transaction environment (spec.md §4.6)
// - `resolver` / `resolver_registry` — the storage-integration seam
//   (spec.md §4.3) and its per-entity binding table (spec.md §4.1)
// - `rbac_gate` — access control (spec.md §4.8)
// - `triggers` — the before/after trigger and catch-clause engine,
//   plus an observational event bus (spec.md §4.7)
// - `graph` — the relationship graph used for cascade purge and join
//   planning (spec.md §3, §4.4)
// - `policy` — the timeout/retry/circuit-breaker envelope every
//   resolver call runs through (spec.md §5)
// - `expr` — expression evaluation and the `@expr` recomputation pass
//   (spec.md §4.4 item 1, §4.5)
// - `joins` — the join/aggregation query planner (spec.md §4.4 item 4)
// - `agents` — the agent invocation hook (spec.md §4.10)
// - `redact` — PII scrubbing applied before an instance crosses into a
//   logged or broadcast event (spec.md §7)
// - `exec_graph` — the optional compiled execution-graph tier, whose
//   pause/resume semantics are authoritative for SUSPEND (spec.md §4.9)

pub mod agents;
pub mod environment;
pub mod evaluator;
pub mod exec_graph;
pub mod expr;
pub mod graph;
pub mod joins;
pub mod policy;
pub mod rbac_gate;
pub mod redact;
pub mod resolver;
pub mod resolver_registry;
pub mod triggers;

pub use agents::{AgentInvocationHook, AgentInvocationRequest, AgentInvocationResult, NoopAgentHook};
pub use environment::{Environment, ModeFlags};
pub use evaluator::{Evaluator, Outcome};
pub use exec_graph::{compile as compile_graph, resume as resume_graph, walk as walk_graph, Graph, GraphNode, GraphStatus, Suspension};
pub use expr::FunctionTable;
pub use graph::{Edge, RelationshipGraph};
pub use policy::CircuitBreaker;
pub use rbac_gate::AuthContext;
pub use resolver::{AuthInfo, InMemoryResolver, Resolver, TransactionId};
pub use resolver_registry::ResolverRegistry;
pub use triggers::{EventBus, EventOperation, Phase, TriggerEvent, WorkflowExecutor};
