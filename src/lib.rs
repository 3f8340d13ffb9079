// Agentlang core
// A declarative, data-centric application language's core pattern-oriented
// workflow evaluator: module registry, instance/entity/relationship data
// model, resolver interface, expression & pattern evaluator, transaction
// lifecycle, trigger/catch engine, RBAC gate, and agent invocation hook.

//! # Agentlang Core
//!
//! This is the library crate's root. It defines the public API external
//! hosts use to load modules, register resolvers, and run workflows.
//!
//! ## Core Components
//!
//! ### Domain Models (`crate::models`)
//! Pure, storage-agnostic data: [`Module`]/[`ModuleRegistry`], [`Instance`],
//! [`RecordSchema`], [`RelationshipSchema`], the pattern/statement AST, RBAC
//! rules, trigger bindings, and agent definitions. Nothing in this layer
//! talks to a resolver or evaluates a pattern.
//!
//! ### Engine (`crate::engine`)
//! The pattern interpreter ([`Evaluator`]) and everything it depends on to
//! run a workflow: the [`Resolver`] trait hosts implement to back an entity,
//! the [`ResolverRegistry`] binding entities to resolvers, the RBAC gate, the
//! trigger/catch engine with its observational [`EventBus`], the relationship
//! graph, the resolver-call policy envelope ([`CircuitBreaker`]), the
//! [`AgentInvocationHook`] a host implements to back agent-typed steps, and
//! the optional compiled execution-graph tier whose [`Suspension`] is the
//! authoritative representation of a paused workflow.
//!
//! ### Configuration (`crate::config`)
//! [`EngineConfig`] loads `AGENTLANG_*` environment variables the way the
//! reference host is expected to honor them.
//!
//! ### Errors (`crate::error`)
//! [`AgentlangError`] covers every documented failure kind — validation,
//! authorization, resolver unavailability, suspension — as a single
//! `thiserror` enum threaded through every fallible call in the crate.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;

pub use config::{init_tracing, EngineConfig};
pub use error::{AgentlangError, Result};

pub use models::{
    AgentDefinition, FqName, Instance, LocalName, Module, ModuleName, ModuleRegistry,
    RecordSchema, RelationshipSchema, Value, WorkflowDefinition,
};

pub use engine::{
    AgentInvocationHook, AuthContext, CircuitBreaker, Environment, EventBus, Evaluator,
    GraphStatus, InMemoryResolver, Resolver, ResolverRegistry, Suspension, WorkflowExecutor,
};
