// Module declarations and the process-wide Module Registry
// (spec.md §3 "Modules", §4.1 "Module Registry").

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::info;

use crate::error::{AgentlangError, Result};

use super::agent::AgentDefinition;
use super::ids::{FqName, LocalName, ModuleName};
use super::relationship::RelationshipSchema;
use super::schema::{RecordKind, RecordSchema};
use super::workflow_def::WorkflowDefinition;

/// A loaded module: its declared records/entities/events, relationships,
/// workflows, agents, and any resolver bindings (spec.md §3, "Modules").
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: Option<ModuleName>,
    pub records: HashMap<LocalName, RecordSchema>,
    pub relationships: HashMap<LocalName, RelationshipSchema>,
    pub workflows: HashMap<LocalName, WorkflowDefinition>,
    pub agents: HashMap<LocalName, AgentDefinition>,
    /// `FQName -> resolverName`; see `engine::resolver_registry`.
    pub resolver_bindings: HashMap<LocalName, String>,
    /// Statements run once, in order, when the module is first loaded.
    pub standalone_init_statements: Vec<super::pattern::Pattern>,
}

impl Module {
    pub fn new(name: impl Into<ModuleName>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> ModuleName {
        self.name.clone().unwrap_or_else(|| ModuleName::new(""))
    }

    pub fn add_record(&mut self, schema: RecordSchema) {
        self.records.insert(schema.name.clone(), schema);
    }

    pub fn add_relationship(&mut self, schema: RelationshipSchema) {
        self.relationships.insert(schema.name.clone(), schema);
    }

    pub fn add_workflow(&mut self, workflow: WorkflowDefinition) {
        self.workflows.insert(workflow.name.clone(), workflow);
    }

    pub fn add_agent(&mut self, agent: AgentDefinition) {
        self.agents.insert(agent.name.clone().into(), agent);
    }

    pub fn entities(&self) -> impl Iterator<Item = &RecordSchema> {
        self.records.values().filter(|r| r.kind == RecordKind::Entity)
    }

    /// The entity tagged `is_configuration`, if the module declares one
    /// (spec.md §4.1, "find the configuration entity (tagged via meta)").
    pub fn configuration_entity(&self) -> Option<&RecordSchema> {
        self.records.values().find(|r| r.is_configuration)
    }

    pub fn relationships_touching(&self, entity: &LocalName) -> Vec<&RelationshipSchema> {
        self.relationships
            .values()
            .filter(|r| &r.from == entity || &r.to == entity)
            .collect()
    }
}

/// Process-wide catalog of loaded modules (spec.md §4.1).
///
/// Mutations are process-local; per the spec, callers are expected to
/// serialize registry mutations outside request handling, so the lock
/// here exists only to make concurrent *reads* during request handling
/// safe, the same discipline the teacher's `InMemoryStorage` applies
/// to its maps.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<ModuleName, Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_module(&self, module: Module) {
        let name = module.name();
        // A reload replaces the previous definition wholesale
        // (spec.md §3, "A process-wide registry holds all loaded
        // modules; reload replaces").
        let replaced = self.modules.write().unwrap().insert(name.clone(), module).is_some();
        info!(module = %name, replaced, "module loaded");
    }

    pub fn unload_module(&self, name: &ModuleName) {
        self.modules.write().unwrap().remove(name);
        info!(module = %name, "module unloaded");
    }

    pub fn module(&self, name: &ModuleName) -> Option<Module> {
        self.modules.read().unwrap().get(name).cloned()
    }

    pub fn module_names(&self) -> Vec<ModuleName> {
        self.modules.read().unwrap().keys().cloned().collect()
    }

    /// Resolves a name against a module in two levels, per spec.md
    /// §4.1: an unqualified name resolves against `active_module`; a
    /// qualified `Mod/Ent` name bypasses it.
    pub fn resolve_record(
        &self,
        active_module: &ModuleName,
        name: &str,
    ) -> Result<(FqName, RecordSchema)> {
        let fq = if let Some(fq) = FqName::parse(name) {
            fq
        } else {
            FqName::new(active_module.clone(), LocalName::new(name))
        };
        let modules = self.modules.read().unwrap();
        let module = modules
            .get(&fq.module)
            .ok_or_else(|| AgentlangError::NotFound(format!("module {}", fq.module)))?;
        let schema = module
            .records
            .get(&fq.name)
            .cloned()
            .ok_or_else(|| AgentlangError::NotFound(format!("record {fq}")))?;
        Ok((fq, schema))
    }

    pub fn resolve_workflow(
        &self,
        active_module: &ModuleName,
        name: &str,
    ) -> Result<WorkflowDefinition> {
        let fq = if let Some(fq) = FqName::parse(name) {
            fq
        } else {
            FqName::new(active_module.clone(), LocalName::new(name))
        };
        let modules = self.modules.read().unwrap();
        let module = modules
            .get(&fq.module)
            .ok_or_else(|| AgentlangError::NotFound(format!("module {}", fq.module)))?;
        module
            .workflows
            .get(&fq.name)
            .cloned()
            .ok_or_else(|| AgentlangError::NotFound(format!("workflow {fq}")))
    }

    /// Finds every composite unique attribute set across all entities
    /// of a module (spec.md §4.1).
    pub fn composite_unique_sets(&self, module: &ModuleName) -> HashMap<LocalName, Vec<Vec<String>>> {
        let modules = self.modules.read().unwrap();
        let mut out = HashMap::new();
        if let Some(m) = modules.get(module) {
            for schema in m.entities() {
                let sets: Vec<Vec<String>> = schema
                    .composite_unique_sets()
                    .into_iter()
                    .map(|names| names.into_iter().map(|n| n.as_str().to_string()).collect())
                    .collect();
                if !sets.is_empty() {
                    out.insert(schema.name.clone(), sets);
                }
            }
        }
        out
    }

    /// Names of entities reachable from no relationship edge at all —
    /// useful for schema-validation diagnostics, the same role
    /// `WorkflowDefinition::find_unreachable_states` plays for Petri
    /// nets in the teacher crate.
    pub fn isolated_entities(&self, module: &ModuleName) -> HashSet<LocalName> {
        let modules = self.modules.read().unwrap();
        let mut isolated = HashSet::new();
        if let Some(m) = modules.get(module) {
            let connected: HashSet<&LocalName> = m
                .relationships
                .values()
                .flat_map(|r| vec![&r.from, &r.to])
                .collect();
            for entity in m.entities() {
                if !connected.contains(&entity.name) {
                    isolated.insert(entity.name.clone());
                }
            }
        }
        isolated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::{AttributeSchema, AttributeType};

    #[test]
    fn unqualified_name_resolves_against_active_module() {
        let registry = ModuleRegistry::new();
        let mut module = Module::new("Acme.Crm");
        module.add_record(
            RecordSchema::new("Customer", RecordKind::Entity)
                .with_attribute(AttributeSchema::new("id", AttributeType::Int).id()),
        );
        registry.load_module(module);

        let (fq, schema) = registry
            .resolve_record(&ModuleName::new("Acme.Crm"), "Customer")
            .unwrap();
        assert_eq!(fq.to_string(), "Acme.Crm/Customer");
        assert_eq!(schema.name.as_str(), "Customer");
    }

    #[test]
    fn qualified_name_bypasses_active_module() {
        let registry = ModuleRegistry::new();
        let mut module = Module::new("Other");
        module.add_record(RecordSchema::new("Thing", RecordKind::Entity));
        registry.load_module(module);

        let (fq, _) = registry
            .resolve_record(&ModuleName::new("Unrelated"), "Other/Thing")
            .unwrap();
        assert_eq!(fq.module.as_str(), "Other");
    }

    #[test]
    fn reload_replaces_previous_definition() {
        let registry = ModuleRegistry::new();
        let mut first = Module::new("M");
        first.add_record(RecordSchema::new("A", RecordKind::Entity));
        registry.load_module(first);

        let second = Module::new("M");
        registry.load_module(second);

        assert!(registry
            .resolve_record(&ModuleName::new("M"), "A")
            .is_err());
    }

    #[test]
    fn isolated_entities_are_those_with_no_relationship_edge() {
        let registry = ModuleRegistry::new();
        let mut module = Module::new("M");
        module.add_record(RecordSchema::new("A", RecordKind::Entity));
        module.add_record(RecordSchema::new("B", RecordKind::Entity));
        module.add_record(RecordSchema::new("C", RecordKind::Entity));
        module.add_relationship(RelationshipSchema::contains("AB", "A", "B"));
        registry.load_module(module);

        let isolated = registry.isolated_entities(&ModuleName::new("M"));
        assert!(isolated.contains(&LocalName::new("C")));
        assert!(!isolated.contains(&LocalName::new("A")));
    }
}
