//! The flow validator.
//!
//! Deploy-time validation treats every finding from steps 1-7 as fatal;
//! save-time validation only runs the structural basics (steps 1-5), so a
//! flow mid-edit can be saved without deploying it.

use std::collections::HashSet;

use registry::NodeRegistry;

use crate::models::FlowDocument;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

use serde::{Deserialize, Serialize};

/// Node types that need at least two inbound edges to be meaningful.
const ARITY_CHECKED_TYPES: [&str; 2] = ["math", "comparison"];

/// Strict, deploy-time validation: every check is fatal.
#[must_use]
pub fn validate_for_deploy(flow: &FlowDocument, registry: &NodeRegistry) -> ValidationReport {
    run(flow, registry, true)
}

/// Permissive, save-time validation: only the structural basics (1-5) are
/// checked.
#[must_use]
pub fn validate_for_save(flow: &FlowDocument, registry: &NodeRegistry) -> ValidationReport {
    run(flow, registry, false)
}

fn run(flow: &FlowDocument, registry: &NodeRegistry, strict: bool) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // 1. non-empty node set
    if flow.nodes.is_empty() {
        errors.push("flow has no nodes".to_string());
        return ValidationReport { valid: false, errors, warnings };
    }

    // 2. every node has id and type
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &flow.nodes {
        if node.id.is_empty() {
            errors.push("a node is missing its id".to_string());
        } else if !seen_ids.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id '{}'", node.id));
        }
        if node.node_type.is_empty() {
            errors.push(format!("node '{}' is missing its type", node.id));
        }
    }

    let node_ids: HashSet<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();

    // 3. at least one trigger node — a node with no inbound edges.
    let targets: HashSet<&str> = flow.edges.iter().map(|e| e.target_node_id.as_str()).collect();
    let trigger_nodes: Vec<&str> = flow.nodes.iter().map(|n| n.id.as_str()).filter(|id| !targets.contains(id)).collect();
    if trigger_nodes.is_empty() {
        errors.push("flow has no trigger node (a node with no inbound edges)".to_string());
    }

    // 4. every edge's endpoints exist
    for edge in &flow.edges {
        if !node_ids.contains(edge.source_node_id.as_str()) {
            errors.push(format!("edge references unknown source node '{}'", edge.source_node_id));
        }
        if !node_ids.contains(edge.target_node_id.as_str()) {
            errors.push(format!("edge references unknown target node '{}'", edge.target_node_id));
        }
    }

    // 5. no cycles — white/grey/black DFS colouring.
    if errors.is_empty() {
        if let Some(cycle_node) = find_cycle(flow) {
            errors.push(format!("flow graph contains a cycle reachable from '{cycle_node}'"));
        }
    }

    if !strict {
        return ValidationReport { valid: errors.is_empty(), errors, warnings };
    }

    // 6. node-type-specific `validate`, if present.
    for node in &flow.nodes {
        match registry.validate_node(&node.node_type, &node.data) {
            None => errors.push(format!("node '{}' has unknown type '{}'", node.id, node.node_type)),
            Some(findings) => {
                for finding in findings {
                    errors.push(format!("node '{}': {finding}", node.id));
                }
            }
        }
    }

    // 7. connectivity sanity.
    for node in &flow.nodes {
        let inbound = flow.incoming_edges(&node.id);
        let is_trigger = trigger_nodes.contains(&node.id.as_str());
        if is_trigger && !inbound.is_empty() {
            errors.push(format!("trigger node '{}' must not have inbound edges", node.id));
        }
        if !is_trigger && inbound.is_empty() {
            errors.push(format!("non-source node '{}' has no inbound edges", node.id));
        }
        if ARITY_CHECKED_TYPES.contains(&node.node_type.as_str()) && inbound.len() < 2 {
            errors.push(format!("node '{}' ({}) needs at least 2 inbound edges, has {}", node.id, node.node_type, inbound.len()));
        }
    }

    ValidationReport { valid: errors.is_empty(), errors, warnings }
}

/// Iterative white/grey/black DFS. Returns the id of a node on a detected
/// cycle, or `None` if the graph is acyclic.
fn find_cycle(flow: &FlowDocument) -> Option<String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Colour {
        White,
        Grey,
        Black,
    }

    use std::collections::HashMap;
    let mut colour: HashMap<&str, Colour> =
        flow.nodes.iter().map(|n| (n.id.as_str(), Colour::White)).collect();

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &flow.edges {
        adjacency.entry(edge.source_node_id.as_str()).or_default().push(edge.target_node_id.as_str());
    }

    for start in flow.nodes.iter().map(|n| n.id.as_str()) {
        if colour[start] != Colour::White {
            continue;
        }
        // Explicit stack of (node, next-child-index) frames — avoids
        // recursion on large graphs.
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        colour.insert(start, Colour::Grey);
        while let Some(&mut (node, ref mut idx)) = stack.last_mut() {
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if *idx < children.len() {
                let child = children[*idx];
                *idx += 1;
                match colour.get(child).copied().unwrap_or(Colour::White) {
                    Colour::White => {
                        colour.insert(child, Colour::Grey);
                        stack.push((child, 0));
                    }
                    Colour::Grey => return Some(child.to_string()),
                    Colour::Black => {}
                }
            } else {
                colour.insert(node, Colour::Black);
                stack.pop();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeInstance};

    fn node(id: &str, ty: &str) -> NodeInstance {
        NodeInstance { id: id.to_string(), node_type: ty.to_string(), data: serde_json::Value::Null, position: serde_json::Value::Null }
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge { source_node_id: from.to_string(), source_port: "out".to_string(), target_node_id: to.to_string(), target_port: "in".to_string() }
    }

    fn registry_with_builtins() -> NodeRegistry {
        let registry = NodeRegistry::new();
        registry::register_builtins(&registry);
        registry
    }

    #[test]
    fn empty_flow_is_invalid() {
        let flow = FlowDocument::new("f", vec![], vec![]);
        let report = validate_for_save(&flow, &registry_with_builtins());
        assert!(!report.valid);
    }

    #[test]
    fn single_trigger_node_with_no_edges_is_valid() {
        let flow = FlowDocument::new("f", vec![node("a", "tag-input")], vec![]);
        let report = validate_for_save(&flow, &registry_with_builtins());
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn cycle_is_rejected() {
        let flow = FlowDocument::new("f", vec![node("a", "tag-input"), node("b", "tag-output")], vec![edge("a", "b"), edge("b", "a")]);
        let report = validate_for_save(&flow, &registry_with_builtins());
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn non_trigger_node_without_inbound_edge_fails_strict_validation() {
        let flow = FlowDocument::new(
            "f",
            vec![node("a", "tag-input"), node("orphan", "tag-output")],
            vec![],
        );
        let report = validate_for_deploy(&flow, &registry_with_builtins());
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("orphan")));
    }

    #[test]
    fn unknown_node_type_fails_strict_validation_only() {
        let flow = FlowDocument::new("f", vec![node("a", "does-not-exist")], vec![]);
        assert!(validate_for_save(&flow, &registry_with_builtins()).valid);
        assert!(!validate_for_deploy(&flow, &registry_with_builtins()).valid);
    }

    #[test]
    fn math_with_fewer_than_two_inbound_edges_fails_strict_validation() {
        let flow = FlowDocument::new(
            "f",
            vec![node("a", "tag-input"), node("m", "math")],
            vec![edge("a", "m")],
        );
        let report = validate_for_deploy(&flow, &registry_with_builtins());
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("math")));
    }

    #[test]
    fn math_with_fewer_than_two_inbound_edges_only_warns_at_save_time() {
        let flow = FlowDocument::new(
            "f",
            vec![node("a", "tag-input"), node("m", "math")],
            vec![edge("a", "m")],
        );
        let report = validate_for_save(&flow, &registry_with_builtins());
        assert!(report.valid, "{:?}", report.errors);
    }
}
