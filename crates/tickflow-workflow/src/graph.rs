//! Graph checks over a workflow's nodes and edges.
//!
//! The graph is small (tens of nodes), so every edge mutation re-validates
//! the whole edge set with a DFS instead of maintaining a cached topological
//! order.

use std::collections::{HashMap, HashSet};

use tickflow_core::{Result, TickflowError};

use crate::model::{Edge, WorkflowNode};

/// Validate edges against a node set: known endpoints, no self-loops,
/// no duplicate `from → to` pairs, and no cycles.
pub fn validate_edges(nodes: &[WorkflowNode], edges: &[Edge]) -> Result<()> {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for edge in edges {
        for endpoint in [&edge.from, &edge.to] {
            if !ids.contains(endpoint.as_str()) {
                return Err(TickflowError::Validation(format!(
                    "edge {} → {} references unknown node '{endpoint}'",
                    edge.from, edge.to
                )));
            }
        }
        if edge.from == edge.to {
            return Err(TickflowError::CycleDetected(format!(
                "node '{}' cannot depend on itself",
                edge.from
            )));
        }
        if !seen.insert((edge.from.as_str(), edge.to.as_str())) {
            return Err(TickflowError::Validation(format!(
                "duplicate edge {} → {}",
                edge.from, edge.to
            )));
        }
    }

    if let Some(node) = find_cycle(nodes, edges) {
        return Err(TickflowError::CycleDetected(format!(
            "edges form a cycle through node '{node}'"
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// First node found on a cycle, if any.
pub fn find_cycle(nodes: &[WorkflowNode], edges: &[Edge]) -> Option<String> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for edge in edges {
        if let (Some(&from), Some(&to)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str())) {
            adjacency[from].push(to);
        }
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    for start in 0..nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // Iterative DFS: (node, next child position).
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::InProgress;
        while let Some(top) = stack.len().checked_sub(1) {
            let (node, child) = stack[top];
            if let Some(&next) = adjacency[node].get(child) {
                stack[top].1 += 1;
                match marks[next] {
                    Mark::InProgress => return Some(nodes[next].id.clone()),
                    Mark::Unvisited => {
                        marks[next] = Mark::InProgress;
                        stack.push((next, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    None
}

/// Edges pointing into `node_id`.
pub fn incoming<'a>(edges: &'a [Edge], node_id: &str) -> Vec<&'a Edge> {
    edges.iter().filter(|e| e.to == node_id).collect()
}

/// Nodes with no incoming edges, in declaration order.
pub fn roots<'a>(nodes: &'a [WorkflowNode], edges: &[Edge]) -> Vec<&'a WorkflowNode> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.to.as_str()).collect();
    nodes
        .iter()
        .filter(|n| !targets.contains(n.id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeSchedule, NodeType};

    fn nodes(ids: &[&str]) -> Vec<WorkflowNode> {
        ids.iter()
            .map(|id| WorkflowNode {
                id: id.to_string(),
                name: id.to_uppercase(),
                node_type: NodeType::AgentTask,
                prompt: None,
                agent_id: None,
                skill_refs: Vec::new(),
                config: serde_json::Value::Null,
                schedule: NodeSchedule::Dependency,
                enabled: true,
                job_id: None,
                created_at_ms: 0,
                updated_at_ms: 0,
            })
            .collect()
    }

    #[test]
    fn test_dag_is_valid() {
        let n = nodes(&["a", "b", "c", "d"]);
        let edges = vec![
            Edge::new("a", "b"),
            Edge::new("a", "c"),
            Edge::new("b", "d"),
            Edge::new("c", "d"),
        ];
        assert!(validate_edges(&n, &edges).is_ok());
        assert_eq!(find_cycle(&n, &edges), None);
    }

    #[test]
    fn test_cycle_detected() {
        let n = nodes(&["a", "b", "c"]);
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "c"), Edge::new("c", "a")];
        let err = validate_edges(&n, &edges).unwrap_err();
        assert!(matches!(err, TickflowError::CycleDetected(_)));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let n = nodes(&["a"]);
        let err = validate_edges(&n, &[Edge::new("a", "a")]).unwrap_err();
        assert!(matches!(err, TickflowError::CycleDetected(_)));
    }

    #[test]
    fn test_unknown_endpoint_and_duplicate() {
        let n = nodes(&["a", "b"]);
        let err = validate_edges(&n, &[Edge::new("a", "zzz")]).unwrap_err();
        assert!(matches!(err, TickflowError::Validation(_)));

        let err = validate_edges(&n, &[Edge::new("a", "b"), Edge::new("a", "b").when("ok")])
            .unwrap_err();
        assert!(matches!(err, TickflowError::Validation(_)));
    }

    #[test]
    fn test_roots_and_incoming() {
        let n = nodes(&["a", "b", "c"]);
        let edges = vec![Edge::new("a", "c"), Edge::new("b", "c")];
        let root_ids: Vec<&str> = roots(&n, &edges).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(root_ids, vec!["a", "b"]);
        assert_eq!(incoming(&edges, "c").len(), 2);
        assert!(incoming(&edges, "a").is_empty());
    }
}
