// Before/after trigger declarations (spec.md §4.7 "Trigger & Catch Engine").
//
// Generalizes the teacher's `engine::events::EventBus` subscription
// idiom: there, any listener may subscribe to a broadcast of resource
// events; here, an entity declares exactly which workflow fires
// before/after which operation, and that dispatch happens synchronously
// inside the triggering transaction rather than over a channel.

use serde::{Deserialize, Serialize};

use super::ids::LocalName;
use super::rbac::Operation;

/// One `@before`/`@after` binding: `<op> <Workflow>` (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerBinding {
    pub operation: Operation,
    pub workflow: LocalName,
}

/// The full `@before {...}` / `@after {...}` meta attached to an
/// entity definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityTriggers {
    pub before: Vec<TriggerBinding>,
    pub after: Vec<TriggerBinding>,
}

impl EntityTriggers {
    pub fn before(&self, op: Operation) -> Vec<&LocalName> {
        self.before
            .iter()
            .filter(|b| b.operation == op)
            .map(|b| &b.workflow)
            .collect()
    }

    pub fn after(&self, op: Operation) -> Vec<&LocalName> {
        self.after
            .iter()
            .filter(|b| b.operation == op)
            .map(|b| &b.workflow)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_filters_by_operation() {
        let mut triggers = EntityTriggers::default();
        triggers.before.push(TriggerBinding {
            operation: Operation::Create,
            workflow: LocalName::new("AfterCreateE"),
        });
        triggers.before.push(TriggerBinding {
            operation: Operation::Delete,
            workflow: LocalName::new("BeforeDeleteE"),
        });
        assert_eq!(triggers.before(Operation::Create).len(), 1);
        assert_eq!(triggers.before(Operation::Update).len(), 0);
    }
}
