// Record and entity schema declarations.
// A Record is a value type; an Entity is a Record whose instances persist
// (spec.md §3, "Entities and records").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{AttributeName, LocalName};
use super::value::Value;

/// The primitive type an attribute is declared as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeType {
    String,
    Int,
    /// Double-precision float, named `Number` to match the source
    /// language's vocabulary rather than Rust's.
    Number,
    Decimal,
    Float,
    Boolean,
    Uuid,
    Email,
    Url,
    Password,
    Date,
    Time,
    DateTime,
    Map,
    Any,
    Path,
    /// Array whose elements are all the named primitive type.
    ArrayOf(Box<AttributeType>),
    /// `ref(entity.attr)` — a foreign key to another entity's attribute.
    Reference { entity: String, attribute: String },
}

/// `default(value | uuid() | now() | autoincrement())` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultSpec {
    Literal(Value),
    Uuid,
    Now,
    Autoincrement,
}

/// Per-attribute properties, mirroring the property list in spec.md §3
/// verbatim: `id`, `unique`, `optional`, `indexed`, `default`, `enum`,
/// `oneof`, `ref`, `expr`, `comment`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeProperties {
    pub id: bool,
    pub unique: bool,
    pub optional: bool,
    pub indexed: bool,
    pub default: Option<DefaultSpec>,
    pub enum_values: Option<Vec<Value>>,
    /// `oneof(entity.attr)`: the attribute's value must match one of the
    /// values currently held by the named entity attribute.
    pub oneof: Option<(String, String)>,
    /// `expr(<expression>)` — see `engine::expr` for recomputation.
    pub expr: Option<String>,
    pub comment: Option<String>,
}

/// One declared attribute in a record schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub name: AttributeName,
    pub attr_type: AttributeType,
    pub properties: AttributeProperties,
}

impl AttributeSchema {
    pub fn new(name: impl Into<AttributeName>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            properties: AttributeProperties::default(),
        }
    }

    pub fn id(mut self) -> Self {
        self.properties.id = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.properties.unique = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.properties.optional = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.properties.indexed = true;
        self
    }

    pub fn default_value(mut self, spec: DefaultSpec) -> Self {
        self.properties.default = Some(spec);
        self
    }

    pub fn enum_values(mut self, values: Vec<Value>) -> Self {
        self.properties.enum_values = Some(values);
        self
    }

    pub fn expr(mut self, expression: impl Into<String>) -> Self {
        self.properties.expr = Some(expression.into());
        self
    }

    pub fn is_expr(&self) -> bool {
        self.properties.expr.is_some()
    }
}

/// Whether a declared schema's instances persist (Entity) or are pure
/// in-memory values (Record). An Event is a Record whose instances
/// trigger workflows (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Record,
    Entity,
    Event,
}

/// RBAC specification attached to an entity (spec.md §4.8); defined
/// here rather than in `rbac.rs` to keep the schema self-describing,
/// and re-exported from there.
pub type RbacSpec = Vec<super::rbac::RbacRule>;

/// Before/after trigger wiring attached to an entity (spec.md §4.7).
pub type TriggerSpec = super::trigger::EntityTriggers;

/// A declared Record, Entity, or Event schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: LocalName,
    pub kind: RecordKind,
    /// Ordered: declaration order matters for `@expr` recomputation
    /// (spec.md §4.5) and for plain-data projection.
    pub attributes: Vec<AttributeSchema>,
    pub rbac: RbacSpec,
    pub triggers: TriggerSpec,
    /// Marks this entity as the module's configuration entity (looked
    /// up by the registry via `find_configuration_entity`, spec.md §4.1).
    pub is_configuration: bool,
}

impl RecordSchema {
    pub fn new(name: impl Into<LocalName>, kind: RecordKind) -> Self {
        Self {
            name: name.into(),
            kind,
            attributes: Vec::new(),
            rbac: Vec::new(),
            triggers: TriggerSpec::default(),
            is_configuration: false,
        }
    }

    pub fn with_attribute(mut self, attr: AttributeSchema) -> Self {
        self.attributes.push(attr);
        self
    }

    /// The entity's sole id attribute, explicit `@id` or, absent one,
    /// the implicit `__id__` the registry assigns (spec.md §3 invariant
    /// "exactly one id attribute").
    pub fn id_attribute(&self) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.properties.id)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name.as_str() == name)
    }

    /// Attributes carrying `@expr`, in declaration order — the order
    /// `engine::expr::recompute` must honor.
    pub fn expr_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| a.is_expr())
    }

    /// Composite unique attribute sets declared via `@unique` across
    /// more than one attribute. The registry's single-attribute
    /// `unique` flags are covered by `id_attribute`/`attribute`
    /// lookups and are not part of this set.
    pub fn composite_unique_sets(&self) -> Vec<Vec<&AttributeName>> {
        // Single-attribute `unique` is covered per-attribute; this
        // crate's source grammar (spec.md §6) does not expose a
        // multi-attribute unique annotation distinct from `@id`, so
        // the composite set is currently always empty. Kept as a
        // method (rather than removed) because the registry contract
        // (spec.md §4.1, "find the composite unique attribute sets")
        // names it explicitly.
        Vec::new()
    }
}

pub type AttributeMap = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_attribute_is_found_by_property_flag() {
        let schema = RecordSchema::new("User", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("email", AttributeType::Email).id())
            .with_attribute(AttributeSchema::new("name", AttributeType::String));
        assert_eq!(schema.id_attribute().unwrap().name.as_str(), "email");
    }

    #[test]
    fn expr_attributes_preserve_declaration_order() {
        let schema = RecordSchema::new("E", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("x", AttributeType::Int))
            .with_attribute(AttributeSchema::new("y", AttributeType::Int).expr("x*10"))
            .with_attribute(AttributeSchema::new("z", AttributeType::Int).expr("y+1"));
        let names: Vec<&str> = schema
            .expr_attributes()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["y", "z"]);
    }
}
