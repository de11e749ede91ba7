//! Dependency graph: cycle reporting, wave computation, upstream closure.
//!
//! Uses `petgraph` to model step dependencies as a directed graph with an
//! edge from each dependency to its dependent. Unknown dependencies and
//! self-edges are left out of the graph; the validator reports them
//! separately.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use stepwise_types::workflow::StepDefinition;

use super::definition::{ValidationError, WorkflowError};

struct StepGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

fn build_graph(steps: &[StepDefinition]) -> StepGraph<'_> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for step in steps {
        // Duplicate ids collapse onto the first declaration.
        index
            .entry(step.id.as_str())
            .or_insert_with(|| graph.add_node(step.id.as_str()));
    }
    for step in steps {
        let to = index[step.id.as_str()];
        for dep in &step.depends_on {
            if dep == &step.id {
                continue;
            }
            if let Some(&from) = index.get(dep.as_str()) {
                graph.update_edge(from, to, ());
            }
        }
    }
    StepGraph { graph, index }
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

/// Every dependency cycle, as a path where each step depends on the next and
/// the last element repeats the first (`a -> b -> a`).
///
/// One path is reported per strongly connected component, starting from the
/// component's first-declared step.
pub fn find_cycles(steps: &[StepDefinition]) -> Vec<Vec<String>> {
    let StepGraph { graph, .. } = build_graph(steps);
    let order: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    let deps: HashMap<&str, &[String]> = steps
        .iter()
        .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
        .collect();

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .filter_map(|component| {
            let members: HashSet<&str> = component.iter().map(|&n| graph[n]).collect();
            let start = *members.iter().min_by_key(|id| order[*id])?;
            cycle_path(start, &members, &deps)
        })
        .collect();
    cycles.sort_by_key(|path| order[path[0].as_str()]);
    cycles
}

/// Depth-first walk along `depends_on` edges inside one component until it
/// returns to `start`.
fn cycle_path(
    start: &str,
    members: &HashSet<&str>,
    deps: &HashMap<&str, &[String]>,
) -> Option<Vec<String>> {
    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    // Stack of (node, next dependency index to try).
    let mut stack: Vec<(&str, usize)> = vec![(start, 0)];

    while let Some(top) = stack.last_mut() {
        let (node, next) = *top;
        top.1 += 1;
        let candidates: &[String] = deps.get(node).copied().unwrap_or_default();
        let Some(dep) = candidates.get(next) else {
            stack.pop();
            path.pop();
            continue;
        };
        let dep = dep.as_str();
        if dep == node || !members.contains(dep) {
            continue;
        }
        if dep == start {
            let mut cycle: Vec<String> = path.iter().map(|s| s.to_string()).collect();
            cycle.push(start.to_string());
            return Some(cycle);
        }
        if visited.insert(dep) {
            path.push(dep);
            stack.push((dep, 0));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Execution plan (wave computation)
// ---------------------------------------------------------------------------

/// Group steps into dependency waves.
///
/// Every step in a wave depends only on steps in earlier waves. The executor
/// does not run wave by wave (it dispatches each step as soon as its own
/// dependencies finish); waves describe the plan for display.
pub fn execution_waves(
    steps: &[StepDefinition],
) -> Result<Vec<Vec<&StepDefinition>>, WorkflowError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let StepGraph { graph, index } = build_graph(steps);
    let sorted = toposort(&graph, None).map_err(|_| {
        WorkflowError::Validation(
            find_cycles(steps)
                .into_iter()
                .map(|path| ValidationError::Cycle { path })
                .collect(),
        )
    })?;

    let step_by_id: HashMap<&str, &StepDefinition> =
        steps.iter().rev().map(|s| (s.id.as_str(), s)).collect();

    // Root nodes have depth 0.
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let id = graph[node];
        let depth = step_by_id[id]
            .depends_on
            .iter()
            .filter(|dep| index.contains_key(dep.as_str()) && dep.as_str() != id)
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&StepDefinition>> = vec![vec![]; max_depth + 1];
    for step in steps {
        waves[depths[step.id.as_str()]].push(step);
    }
    Ok(waves)
}

// ---------------------------------------------------------------------------
// Transitive dependency closure
// ---------------------------------------------------------------------------

/// All steps `step_id` depends on, directly or transitively.
///
/// Unknown ids yield an empty set.
pub fn upstream_steps<'a>(step_id: &str, steps: &'a [StepDefinition]) -> HashSet<&'a str> {
    let step_map: HashMap<&str, &StepDefinition> =
        steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut visited = HashSet::new();
    let mut stack = vec![step_id];

    while let Some(current) = stack.pop() {
        if let Some(step) = step_map.get(current) {
            for dep in &step.depends_on {
                if visited.insert(dep.as_str()) {
                    stack.push(dep.as_str());
                }
            }
        }
    }

    visited
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
