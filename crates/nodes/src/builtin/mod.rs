//! The built-in node set: `Math`, `Comparison`, `Gate`,
//! `TagInput`, `TagOutput`, `Script`. Every node here implements
//! [`crate::ExecutableNode`] the same way a library-provided node type
//! would — the registry and engine never distinguish built-ins from
//! dynamically loaded nodes.

mod comparison;
mod formula;
mod gate;
mod math;
mod script;
mod tag_input;
mod tag_output;
#[cfg(test)]
mod test_support;

pub use comparison::ComparisonNode;
pub use gate::GateNode;
pub use math::MathNode;
pub use script::ScriptNode;
pub use tag_input::TagInputNode;
pub use tag_output::TagOutputNode;

use crate::traits::ExecutableNode;

/// One entry per built-in node type: its registered name and a factory
/// closure producing a fresh instance. `Gate` and `TagOutput` carry
/// per-instance state, so a fresh `Box` is minted on every call rather than
/// a single shared instance being cloned.
#[must_use]
pub fn factories() -> Vec<(&'static str, fn() -> Box<dyn ExecutableNode>)> {
    vec![
        ("math", || Box::new(MathNode) as Box<dyn ExecutableNode>),
        ("comparison", || Box::new(ComparisonNode) as Box<dyn ExecutableNode>),
        ("gate", || Box::new(GateNode::new()) as Box<dyn ExecutableNode>),
        ("tag-input", || Box::new(TagInputNode) as Box<dyn ExecutableNode>),
        ("tag-output", || Box::new(TagOutputNode::new()) as Box<dyn ExecutableNode>),
        ("script", || Box::new(ScriptNode::new()) as Box<dyn ExecutableNode>),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_built_in_has_a_valid_description() {
        for (name, factory) in factories() {
            let node = factory();
            let desc = node.description();
            let findings = crate::description::validate(&desc);
            assert!(
                !findings.iter().any(crate::description::Finding::is_error),
                "{name} has an invalid description: {findings:?}"
            );
        }
    }
}
