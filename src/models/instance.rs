// The Instance model (spec.md §3 "Instance", §4.2 "Instance Model").
// Generalizes the teacher's `Resource` (src/models/resource.rs) from a
// single workflow-token shape into the general record/entity/event value.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::FqName;
use super::value::Value;

/// Comparison operator a query attribute was declared with
/// (`k?op v` — spec.md §4.4, "Pattern kinds", item 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Like,
    Between,
}

impl Default for QueryOp {
    fn default() -> Self {
        QueryOp::Eq
    }
}

/// An ordered name/value attribute slot. A `Vec` rather than a map
/// keeps declaration order without pulling in an extra dependency the
/// teacher doesn't already carry; lookups are linear but instances are
/// small (a handful of attributes).
pub type AttributeList = Vec<(String, Value)>;

/// A value in memory or storage for a record/entity/event type
/// (spec.md GLOSSARY, "Instance").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub fq_name: FqName,
    pub attributes: AttributeList,
    /// Present when this instance represents a query pattern rather
    /// than a concrete value (spec.md §3, "queryAttributes/queryOps").
    pub query_attributes: Vec<(String, Value, QueryOp)>,
    /// `FQName?` with an empty body — query *all* instances of the
    /// entity (spec.md §4.4, item 2).
    pub query_all: bool,
    /// Populated when a pattern nests related entities; append-only
    /// within a single evaluation pass (spec.md §4.2 invariant).
    pub related_instances: HashMap<String, Vec<Instance>>,
    /// The containment path; `None` until the instance has been
    /// created (spec.md §3, "`__path__` is immutable after creation").
    pub path: Option<String>,
    pub deleted: bool,
    /// The active session's user id; every operation on this instance
    /// is gated against it (spec.md §3, "authContext").
    pub auth_context: Option<String>,
}

impl Instance {
    pub fn new(fq_name: FqName, attributes: AttributeList) -> Self {
        Self {
            fq_name,
            attributes,
            query_attributes: Vec::new(),
            query_all: false,
            related_instances: HashMap::new(),
            path: None,
            deleted: false,
            auth_context: None,
        }
    }

    pub fn with_query(
        fq_name: FqName,
        attributes: AttributeList,
        query_attributes: Vec<(String, Value, QueryOp)>,
    ) -> Self {
        Self {
            query_attributes,
            ..Self::new(fq_name, attributes)
        }
    }

    pub fn query_all(fq_name: FqName) -> Self {
        Self {
            query_all: true,
            ..Self::new(fq_name, Vec::new())
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Inserts or replaces an attribute value, preserving first-seen
    /// order for existing keys.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.attributes.push((name, value));
        }
    }

    pub fn id_value(&self, id_attribute: &str) -> Option<&Value> {
        self.get(id_attribute)
    }

    pub fn attach_related(&mut self, relationship: impl Into<String>, instance: Instance) {
        self.related_instances
            .entry(relationship.into())
            .or_default()
            .push(instance);
    }

    pub fn related(&self, relationship: &str) -> &[Instance] {
        self.related_instances
            .get(relationship)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when this instance carries at least one query attribute,
    /// or was built from an entity-level `?` (see `Instance::query_all`).
    pub fn is_query(&self) -> bool {
        !self.query_attributes.is_empty() || self.query_all
    }

    /// Plain-data projection: user attributes only, followed
    /// recursively by related instances (spec.md §4.2, "emit a
    /// plain-data projection").
    pub fn to_plain_data(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.attributes {
            map.insert(
                name.clone(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        for (rel, instances) in &self.related_instances {
            let projected: Vec<serde_json::Value> =
                instances.iter().map(Instance::to_plain_data).collect();
            map.insert(rel.clone(), serde_json::Value::Array(projected));
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fq(name: &str) -> FqName {
        FqName::new("Test", name)
    }

    #[test]
    fn set_replaces_existing_attribute_in_place() {
        let mut inst = Instance::new(fq("E"), vec![("x".into(), Value::Int(1))]);
        inst.set("x", Value::Int(2));
        assert_eq!(inst.attributes.len(), 1);
        assert_eq!(inst.get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn related_instances_are_append_only_per_relationship() {
        let mut parent = Instance::new(fq("User"), vec![]);
        parent.attach_related("UserPost", Instance::new(fq("Post"), vec![("id".into(), Value::Int(1))]));
        parent.attach_related("UserPost", Instance::new(fq("Post"), vec![("id".into(), Value::Int(2))]));
        assert_eq!(parent.related("UserPost").len(), 2);
    }

    #[test]
    fn plain_data_projection_nests_related_instances() {
        let mut parent = Instance::new(fq("User"), vec![("email".into(), Value::Str("j@b.com".into()))]);
        parent.attach_related("UserPost", Instance::new(fq("Post"), vec![("id".into(), Value::Int(1))]));
        let data = parent.to_plain_data();
        assert_eq!(data["email"], serde_json::json!("j@b.com"));
        assert_eq!(data["UserPost"].as_array().unwrap().len(), 1);
    }
}
