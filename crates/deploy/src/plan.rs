//! Validation and ordering of the step list.

use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap, HashMap},
};

use petgraph::{
    Direction,
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    error::PlanError,
    step::{Step, StepId, StepKind},
};

/// A validated step list in execution order.
#[derive(Debug, Clone)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Validate `steps` and order them topologically.
    ///
    /// Edges come from `depends_on` and from references to steps in the list.
    /// References to steps outside the list are left to the ledger. Among
    /// steps that are ready at the same time, the one declared first runs
    /// first.
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        let mut index_of: HashMap<&StepId, usize> = HashMap::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            check_shape(step)?;
            if index_of.insert(&step.id, index).is_some() {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }

        // Node weights are declaration indices; an edge runs from a
        // prerequisite to the step that needs it.
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(steps.len(), steps.len());
        let nodes: Vec<NodeIndex> = (0..steps.len()).map(|index| graph.add_node(index)).collect();

        for (index, step) in steps.iter().enumerate() {
            let mut prerequisites = BTreeSet::new();

            for dependency in &step.depends_on {
                let &prerequisite = index_of.get(dependency).ok_or_else(|| PlanError::UnknownStep {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                })?;
                prerequisites.insert(prerequisite);
            }
            for reference in step.references() {
                if let Some(&prerequisite) = index_of.get(reference) {
                    prerequisites.insert(prerequisite);
                }
            }

            for prerequisite in prerequisites {
                if prerequisite == index {
                    return Err(PlanError::CyclicDependency(vec![step.id.clone()]));
                }
                graph.add_edge(nodes[prerequisite], nodes[index], ());
            }
        }

        let order = declaration_toposort(&graph).map_err(|members| {
            PlanError::CyclicDependency(
                members
                    .into_iter()
                    .map(|index| steps[index].id.clone())
                    .collect(),
            )
        })?;

        let mut slots: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
        let steps = order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.iter().map(|step| &step.id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

/// Kahn's algorithm over declaration indices: among ready nodes, the lowest
/// index goes first. On a cycle, returns the indices of the steps on it.
///
/// Node `i` must carry weight `i`.
fn declaration_toposort(graph: &DiGraph<usize, ()>) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|node| (node, graph.neighbors_directed(node, Direction::Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| Reverse(graph[*node]))
        .collect();
    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for dependent in graph.neighbors_directed(NodeIndex::new(index), Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(graph[dependent]));
                }
            }
        }
    }

    if order.len() == graph.node_count() {
        return Ok(order);
    }

    let mut members: Vec<usize> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .map(|node| graph[node])
        .collect();
    members.sort_unstable();
    Err(members)
}

fn check_shape(step: &Step) -> Result<(), PlanError> {
    let malformed = |detail: &str| PlanError::MalformedStep {
        step: step.id.clone(),
        detail: detail.to_string(),
    };

    if step.id.is_empty() {
        return Err(malformed("empty step id"));
    }
    if step.contract.is_empty() {
        return Err(malformed("no contract name"));
    }
    match step.kind {
        StepKind::DeployContract if step.target.is_some() || step.method.is_some() => {
            Err(malformed("deployments take no target or method"))
        }
        StepKind::InvokeSetup if step.target.is_none() => Err(malformed("setup call has no target")),
        StepKind::InvokeSetup if step.method.as_deref().is_none_or(str::is_empty) => {
            Err(malformed("setup call has no method"))
        }
        _ => Ok(()),
    }
}
