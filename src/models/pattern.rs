// The pattern/statement AST (spec.md §4.4 "Expression & Pattern Evaluator",
// §6 "Pattern source syntax"). Parsing itself is out of scope (spec.md §1);
// this module defines the typed tree a parser component is expected to
// hand the evaluator.
//
// Mirrors the recursive-enum-with-Box idiom of the teacher's
// `models::rule::RuleCondition` (`Not(Box<Rule>)`), generalized to the
// much larger grammar a workflow statement can take.

use serde::{Deserialize, Serialize};

use super::instance::QueryOp;

/// Binary relational/logical/arithmetic operator (spec.md §4.4 item 7:
/// "Relational ops: ==, !=, <, <=, >, >=. Logical ops: and, or").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

/// A pure expression — literals, references, function calls, and
/// binary operations (spec.md §4.4 item 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    Array(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    /// `a.b.c` — walks instance -> attribute -> nested-instance ->
    /// attribute. An unresolvable intermediate segment evaluates to
    /// an empty result rather than erroring (spec.md §4.4 item 1).
    Reference(Vec<String>),
    /// A plain identifier, e.g. an alias bound by a previous statement.
    Ident(String),
    /// A call into the registered plug-in function table; the
    /// environment is implicitly appended as the call's last argument
    /// by the evaluator (spec.md §4.4 item 1).
    Call(String, Vec<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
}

/// One `attr op value` slot inside a CRUD map — a set (`k v`) is
/// represented with `op: None`; a query (`k? v` / `k?op v`) carries
/// the operator, defaulting to `Eq` (spec.md §4.4 item 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSlot {
    pub name: String,
    pub value: Expr,
    pub query_op: Option<QueryOp>,
}

/// A nested relationship pattern inside a CRUD map (spec.md §4.4
/// item 3): either a single child pattern or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RelationshipPattern {
    Single(Box<Pattern>),
    List(Vec<Pattern>),
}

/// Join clause kind (spec.md §4.4 item 4, §6 keyword order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub entity: String,
    /// The single equality condition every join clause takes
    /// (spec.md §4.4 item 4, "exactly one equality condition").
    pub on_attribute: String,
    pub on_reference: Expr,
}

/// One projected column in an `@into` clause — a plain alias or an
/// aggregate function over a referenced column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IntoProjection {
    Alias { alias: String, reference: Expr },
    Sum { alias: String, reference: Expr },
    Count { alias: String, reference: Expr },
    Avg { alias: String, reference: Expr },
    Min { alias: String, reference: Expr },
    Max { alias: String, reference: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// The hints a statement can carry (spec.md §4.4: `@catch`,
/// `@distinct`, `@limit`, `@orderBy`, `@groupBy`, `@where`, `@upsert`,
/// `@from`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hints {
    pub upsert: bool,
    pub from: Option<Expr>,
    pub joins: Vec<JoinClause>,
    pub into: Vec<IntoProjection>,
    pub where_clauses: Vec<AttributeSlot>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub sort_direction: Option<SortDirection>,
    pub distinct: bool,
    pub limit: Option<u64>,
    pub catch: Vec<CatchClause>,
}

/// `@catch { <kind> <pattern>, ... }` — spec.md §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    pub kind: String,
    pub recovery: Box<Pattern>,
}

/// How a statement's result is bound (spec.md §4.4, "Alias binding").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AliasBinding {
    None,
    Name(String),
    /// `@as [a, b, _, rest]` — `_` skips a slot; a trailing bare name
    /// captures the remainder of an array result.
    Destructure(Vec<DestructureSlot>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DestructureSlot {
    Skip,
    Bind(String),
    Rest(String),
}

/// A CRUD map pattern (spec.md §4.4 item 2): `{FQName {attr v, ...},
/// <relationships>, <hints>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrudMap {
    pub entity: String,
    /// `FQName?` with an empty body (spec.md §4.4 item 2).
    pub query_all: bool,
    pub attributes: Vec<AttributeSlot>,
    pub relationships: Vec<(String, RelationshipPattern)>,
    pub hints: Hints,
}

/// Full-text search pattern (spec.md §4.4 item 10):
/// `{FQName? "<text>" <options>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullTextSearch {
    pub entity: String,
    pub query: String,
    pub options: Vec<(String, Expr)>,
}

/// One statement, with its optional alias binding (spec.md §4.4,
/// "A statement is a pattern optionally bound to one alias").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub pattern: Pattern,
    pub alias: AliasBinding,
}

/// The sole syntactic form for CRUD, query, control flow, and
/// expression evaluation (spec.md GLOSSARY, "Pattern").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Pattern {
    Expr(Expr),
    Crud(CrudMap),
    Delete { inner: Box<CrudMap>, purge: bool },
    ForEach { source: Box<Pattern>, binding: String, body: Vec<Statement> },
    If { condition: Expr, then_branch: Vec<Statement>, else_branch: Option<Vec<Statement>> },
    Return(Box<Pattern>),
    Suspend(Box<Pattern>),
    FullTextSearch(FullTextSearch),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructure_slots_model_skip_bind_and_rest() {
        let binding = AliasBinding::Destructure(vec![
            DestructureSlot::Bind("a".into()),
            DestructureSlot::Skip,
            DestructureSlot::Rest("rest".into()),
        ]);
        match binding {
            AliasBinding::Destructure(slots) => assert_eq!(slots.len(), 3),
            _ => panic!("expected destructure"),
        }
    }
}
