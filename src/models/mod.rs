// Core domain models for Agentlang
// These are the data structures the pattern evaluator operates on:
// schemas, relationships, instances, modules, and the declarations
// (RBAC, triggers, agents, workflows) attached to them.

//! # Domain Models
//!
//! Generic, storage-agnostic data structures that make up the
//! language's data model (spec.md §3). Nothing in this module talks
//! to a resolver or evaluates a pattern — see `crate::engine` for
//! that.

pub mod agent;
pub mod ids;
pub mod instance;
pub mod module;
pub mod pattern;
pub mod rbac;
pub mod relationship;
pub mod schema;
pub mod trigger;
pub mod value;
pub mod workflow_def;

pub use agent::{
    AgentDefinition, AgentExecution, AgentExecutionStatus, AgentId, AgentRetryConfig,
    AgentScenario, LLMConfig, LLMProvider,
};
pub use ids::{AttributeName, FqName, LocalName, ModuleName};
pub use instance::{AttributeList, Instance, QueryOp};
pub use module::{Module, ModuleRegistry};
pub use pattern::{
    AliasBinding, AttributeSlot, BinOp, CatchClause, CrudMap, DestructureSlot, Expr,
    FullTextSearch, Hints, IntoProjection, JoinClause, JoinKind, Pattern, RelationshipPattern,
    SortDirection, Statement,
};
pub use rbac::{Operation, RbacRule, WhereClause, WhereRhs};
pub use relationship::{Cardinality, RelationshipKind, RelationshipSchema};
pub use schema::{
    AttributeMap, AttributeProperties, AttributeSchema, AttributeType, DefaultSpec, RbacSpec,
    RecordKind, RecordSchema, TriggerSpec,
};
pub use trigger::{EntityTriggers, TriggerBinding};
pub use value::Value;
pub use workflow_def::WorkflowDefinition;
