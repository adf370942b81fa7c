//! `registry` crate — the node-type registry and the dynamic library
//! manager.
//!
//! Two small services, constructed once at process start and shared by
//! reference with the engine and the (out-of-scope) API layer, per the
//! "singleton-like registry" design note: no global state, just an
//! `Arc<NodeRegistry>` and an `Arc<LibraryManager>` threaded through
//! `main`.

pub mod error;
pub mod library_manager;
pub mod manifest;
pub mod node_registry;

pub use error::RegistryError;
pub use library_manager::{LibraryContext, LibraryManager, LoadOutcome, LoadSummary};
pub use manifest::{LibraryManifest, LibraryType, Provides};
pub use node_registry::{NodeRegistry, RegisterOptions};

/// Register every built-in node type ([`nodes::builtin::factories`]) with
/// `registry`, matching the engine's single bootstrap step: the registry is
/// populated by built-ins first, then a library scan.
/// Built-ins always pass schema validation, so failures here indicate a
/// programming error in this workspace, not bad input — they panic rather
/// than bubble a `Result` through every call site that only ever runs this
/// once at startup.
pub fn register_builtins(registry: &NodeRegistry) {
    for (name, factory) in nodes::builtin::factories() {
        registry
            .register(name, std::sync::Arc::new(factory), None, false)
            .unwrap_or_else(|err| panic!("built-in node type '{name}' failed to register: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builtins_populates_every_built_in_type() {
        let registry = NodeRegistry::new();
        register_builtins(&registry);
        for (name, _) in nodes::builtin::factories() {
            assert!(registry.has(name), "{name} should be registered");
        }
    }
}
