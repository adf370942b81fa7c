//! The node-type registry.
//!
//! A single `RwLock<HashMap<...>>`, write lock taken for
//! register/unregister, read lock for every lookup, so loads/unloads/
//! reloads are serialised against each other while lookups proceed in
//! parallel without blocking one another.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use nodes::description::{self, Finding, NodeDescription};
use nodes::{ExecutableNode, NodeFactory};

use crate::error::RegistryError;

/// One entry in the registry: the type's immutable description (cached at
/// registration time, so `get_description` never has to spin up an
/// instance) plus the factory used to mint fresh instances.
struct RegisteredType {
    description: NodeDescription,
    factory: Arc<dyn NodeFactory>,
    /// `None` for built-ins; `Some(library_id)` for library-provided types,
    /// so `unregister_library_nodes` can find them again.
    library_id: Option<String>,
}

/// Options accepted by [`NodeRegistry::register`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    pub skip_validation: bool,
    pub library_id: Option<&'static str>,
}

pub struct NodeRegistry {
    types: RwLock<HashMap<String, RegisteredType>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { types: RwLock::new(HashMap::new()) }
    }

    /// Register `name` backed by `factory`. Fails if `name` is already
    /// present. Builds one throwaway instance to read its description and,
    /// unless `skip_validation`, runs schema validation — any [`Finding::Error`]
    /// rejects the registration before anything is stored.
    pub fn register(
        &self,
        name: &str,
        factory: Arc<dyn NodeFactory>,
        library_id: Option<String>,
        skip_validation: bool,
    ) -> Result<Vec<Finding>, RegistryError> {
        let mut types = self.types.write().expect("registry lock poisoned");
        if types.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }

        let probe = factory.create();
        let description = probe.description();

        let findings = if skip_validation { Vec::new() } else { description::validate(&description) };
        if findings.iter().any(Finding::is_error) {
            return Err(RegistryError::Validation(format!(
                "node type '{name}' failed schema validation: {findings:?}"
            )));
        }

        types.insert(name.to_string(), RegisteredType { description, factory, library_id });
        Ok(findings)
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.types.read().expect("registry lock poisoned").contains_key(name)
    }

    /// A fresh, independently-owned instance of `name`. Built-ins and
    /// library types alike are minted on demand — nodes like `Gate` and
    /// `TagOutput` carry per-instance state that must never leak between
    /// deployed nodes, so the engine calls this once per node instance in a
    /// flow, not once per node type.
    #[must_use]
    pub fn get_instance(&self, name: &str) -> Option<Box<dyn ExecutableNode>> {
        self.types
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .map(|t| t.factory.create())
    }

    #[must_use]
    pub fn get_description(&self, name: &str) -> Option<NodeDescription> {
        self.types.read().expect("registry lock poisoned").get(name).map(|t| t.description.clone())
    }

    #[must_use]
    pub fn get_all(&self) -> Vec<NodeDescription> {
        self.types.read().expect("registry lock poisoned").values().map(|t| t.description.clone()).collect()
    }

    /// Remove a single type. Returns `true` if it was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.types.write().expect("registry lock poisoned").remove(name).is_some()
    }

    /// Bulk-remove every type registered under `library_id`, for
    /// `LibraryManager::unload_library`. Returns the names removed, for
    /// logging.
    pub fn unregister_library_nodes(&self, library_id: &str) -> Vec<String> {
        let mut types = self.types.write().expect("registry lock poisoned");
        let doomed: Vec<String> = types
            .iter()
            .filter(|(_, t)| t.library_id.as_deref() == Some(library_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &doomed {
            types.remove(name);
        }
        doomed
    }

    /// Run the instance-level validator (an empty `Vec` by default — see
    /// [`nodes::ExecutableNode::validate`]) for `name` against `data`.
    /// Returns `None` if `name` is not registered.
    #[must_use]
    pub fn validate_node(&self, name: &str, data: &serde_json::Value) -> Option<Vec<String>> {
        self.get_instance(name).map(|instance| instance.validate(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nodes::context::ExecutionContext;
    use nodes::description::{PortDescriptor, SemanticType};
    use nodes::error::NodeError;
    use nodes::tag::{TagData, TagValue};
    use nodes::traits::NodeOutput;

    struct Stub;
    #[async_trait]
    impl ExecutableNode for Stub {
        fn description(&self) -> NodeDescription {
            NodeDescription {
                schema_version: 1,
                name: "stub".to_string(),
                display_name: "Stub".to_string(),
                version: "1.0.0".to_string(),
                category: "test".to_string(),
                inputs: vec![],
                outputs: vec![PortDescriptor { name: "out".to_string(), semantic_type: SemanticType::Any, required: true }],
                properties: vec![],
                io_rules: vec![],
                visual: None,
                config_ui: None,
            }
        }
        async fn execute(&self, _ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::new(TagValue::good(TagData::Null), "stub", serde_json::Value::Null, std::time::Duration::ZERO))
        }
    }

    fn stub_factory() -> Arc<dyn NodeFactory> {
        Arc::new(|| Box::new(Stub) as Box<dyn ExecutableNode>)
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = NodeRegistry::new();
        registry.register("stub", stub_factory(), None, false).unwrap();
        assert!(registry.has("stub"));
        assert!(registry.get_instance("stub").is_some());
        assert_eq!(registry.get_description("stub").unwrap().name, "stub");
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let registry = NodeRegistry::new();
        registry.register("stub", stub_factory(), None, false).unwrap();
        let err = registry.register("stub", stub_factory(), None, false).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(name) if name == "stub"));
    }

    #[test]
    fn unregister_library_nodes_only_removes_that_librarys_types() {
        let registry = NodeRegistry::new();
        registry.register("builtin", stub_factory(), None, false).unwrap();
        registry.register("lib-a-foo", stub_factory(), Some("lib-a".to_string()), false).unwrap();
        registry.register("lib-b-bar", stub_factory(), Some("lib-b".to_string()), false).unwrap();

        let removed = registry.unregister_library_nodes("lib-a");
        assert_eq!(removed, vec!["lib-a-foo".to_string()]);
        assert!(registry.has("builtin"));
        assert!(registry.has("lib-b-bar"));
        assert!(!registry.has("lib-a-foo"));
    }

    #[test]
    fn each_get_instance_call_is_independently_owned() {
        let registry = NodeRegistry::new();
        registry.register("stub", stub_factory(), None, false).unwrap();
        let a = registry.get_instance("stub").unwrap();
        let b = registry.get_instance("stub").unwrap();
        assert!(!std::ptr::eq(a.as_ref(), b.as_ref()));
    }
}
