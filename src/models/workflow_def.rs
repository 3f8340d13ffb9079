// Workflow declarations (spec.md GLOSSARY "Workflow": "a named,
// parameterized sequence of statements implementing the body of an event").
//
// Shaped after the teacher's `models::workflow::WorkflowDefinition`
// (`id`, `name`, ordered body, validation), generalized from a flat
// state/activity graph to an ordered statement sequence.

use serde::{Deserialize, Serialize};

use super::ids::LocalName;
use super::pattern::Statement;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: LocalName,
    /// The event entity's attribute names this workflow expects to be
    /// bound into its environment on entry.
    pub params: Vec<String>,
    pub statements: Vec<Statement>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<LocalName>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// A workflow with no statements has nothing to execute and
    /// nothing to return; the registry rejects registering one, the
    /// same way the teacher's `WorkflowDefinition::validate` rejects a
    /// workflow with no states.
    pub fn validate(&self) -> Result<(), String> {
        if self.statements.is_empty() {
            return Err(format!("workflow {} has no statements", self.name));
        }
        Ok(())
    }
}
