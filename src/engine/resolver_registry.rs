// Resolver Registry + Default Router (spec.md §2, §4.3).
//
// Maps a record's fully-qualified name to the resolver that owns it;
// absent a mapping, the default resolver handles it. Lazily
// instantiates and caches per-environment resolver instances, the way
// the teacher's `InMemoryStorage` is handed around as a single shared
// `Arc` rather than rebuilt per call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::FqName;

use super::resolver::Resolver;

/// Maps `FQName -> resolverName` (spec.md §4.3) and holds the named
/// resolver instances themselves. `"default"` is always present.
pub struct ResolverRegistry {
    named: RwLock<HashMap<String, Arc<dyn Resolver>>>,
    bindings: RwLock<HashMap<FqName, String>>,
}

impl ResolverRegistry {
    pub fn new(default: Arc<dyn Resolver>) -> Self {
        let mut named = HashMap::new();
        named.insert("default".to_string(), default);
        Self {
            named: RwLock::new(named),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, resolver: Arc<dyn Resolver>) {
        self.named.write().unwrap().insert(name.into(), resolver);
    }

    pub fn bind(&self, entity: FqName, resolver_name: impl Into<String>) {
        self.bindings.write().unwrap().insert(entity, resolver_name.into());
    }

    /// Resolves which resolver owns `entity`: its explicit binding, or
    /// `"default"` absent one (spec.md §4.3).
    pub fn resolver_for(&self, entity: &FqName) -> Option<Arc<dyn Resolver>> {
        let bindings = self.bindings.read().unwrap();
        let name = bindings
            .get(entity)
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.named.read().unwrap().get(&name).cloned()
    }

    pub fn resolver_name_for(&self, entity: &FqName) -> String {
        self.bindings
            .read()
            .unwrap()
            .get(entity)
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::resolver::InMemoryResolver;

    #[test]
    fn absent_binding_falls_back_to_default() {
        let registry = ResolverRegistry::new(Arc::new(InMemoryResolver::new()));
        let entity = FqName::new("Acme", "Customer");
        assert_eq!(registry.resolver_name_for(&entity), "default");
        assert!(registry.resolver_for(&entity).is_some());
    }

    #[test]
    fn explicit_binding_overrides_default() {
        let registry = ResolverRegistry::new(Arc::new(InMemoryResolver::new()));
        registry.register("vector", Arc::new(InMemoryResolver::new()));
        let entity = FqName::new("Acme", "Document");
        registry.bind(entity.clone(), "vector");
        assert_eq!(registry.resolver_name_for(&entity), "vector");
    }
}
