// Error taxonomy for Agentlang (spec.md §7 "Error Handling Design").
//
// Shaped directly after the teacher's `CircuitBreakerError` (`lib.rs`):
// a flat `thiserror` enum, `#[from]` conversions at the two boundaries
// that actually cross into foreign error types (resolver I/O via
// `anyhow`, serialization via `serde_json`), and a crate-wide `Result`
// alias.

use thiserror::Error;

/// Errors the evaluator, registry, and RBAC gate can raise. Kind names
/// follow spec.md §7's table; `@catch` matches against the kind, not
/// the message.
#[derive(Error, Debug)]
pub enum AgentlangError {
    /// Workflow/pattern source is malformed. Raised by the (external)
    /// parser; the core only ever receives an already-parsed AST, so
    /// this variant exists for hosts that want to surface parse
    /// failures through the same error type.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Schema violation at module-load time: duplicate definitions,
    /// an unknown attribute type, an entity with more than one `@id`.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Attribute value does not match its declared type, enum, or
    /// `oneof` constraint.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Create collided on the id column or a composite unique set.
    #[error("unique violation: {0}")]
    UniqueViolation(String),

    /// A `ref`-typed attribute points at an absent target.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Update/delete by id matched nothing, or a registry lookup
    /// failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// RBAC denied the operation.
    #[error("unauthorised: {0}")]
    Unauthorised(String),

    /// Resolver I/O failure, circuit open, or timeout elapsed.
    #[error("resolver unavailable: {0}")]
    ResolverUnavailable(String),

    /// A join clause, `@into` projection, or `@where` reference could
    /// not be planned against the declared schema.
    #[error("join planning error: {0}")]
    JoinPlanningError(String),

    /// Constraint violation not otherwise covered by a more specific
    /// kind (e.g. an `@oneof` mismatch).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// `entity @enum` attribute received a value outside its allowed
    /// set.
    #[error("enum violation: {0}")]
    EnumViolation(String),

    /// SUSPEND was reached; carries the suspension id the caller must
    /// present to resume (spec.md §4.4 item 9, §4.9).
    #[error("suspended: {0}")]
    SuspensionRequested(String),

    /// Malformed configuration or a missing required setting.
    #[error("config error: {0}")]
    ConfigError(String),

    /// An error raised by workflow code itself via a custom kind tag,
    /// for `@catch` clauses that match on it.
    #[error("{kind}: {message}")]
    Custom { kind: String, message: String },

    /// Resolver-originated failure that doesn't map to one of the
    /// named kinds above.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// (De)serialization boundary failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentlangError {
    /// The kind tag `@catch` clauses match against (spec.md §4.7,
    /// §7). Custom kinds pass through verbatim; every other variant
    /// maps to the fixed vocabulary of spec.md §7's table.
    pub fn kind(&self) -> &str {
        match self {
            AgentlangError::ParseError(_) => "parse_error",
            AgentlangError::ValidationError(_) => "validation_error",
            AgentlangError::TypeMismatch(_) => "error",
            AgentlangError::UniqueViolation(_) => "error",
            AgentlangError::ForeignKeyViolation(_) => "error",
            AgentlangError::NotFound(_) => "not_found",
            AgentlangError::Unauthorised(_) => "unauthorised",
            AgentlangError::ResolverUnavailable(_) => "error",
            AgentlangError::JoinPlanningError(_) => "error",
            AgentlangError::ConstraintViolation(_) => "error",
            AgentlangError::EnumViolation(_) => "error",
            AgentlangError::SuspensionRequested(_) => "suspended",
            AgentlangError::ConfigError(_) => "config_error",
            AgentlangError::Custom { kind, .. } => kind,
            AgentlangError::Storage(_) => "error",
            AgentlangError::Serialization(_) => "error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentlangError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_the_catch_kind_not_found() {
        let err = AgentlangError::NotFound("User/u1".into());
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn custom_kind_passes_through_for_catch_matching() {
        let err = AgentlangError::Custom {
            kind: "insufficient_funds".into(),
            message: "balance too low".into(),
        };
        assert_eq!(err.kind(), "insufficient_funds");
    }
}
