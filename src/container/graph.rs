//! Dependency graph between providers and invokers.
//!
//! Vertices are constructors in declaration order; an edge `p -> c` means
//! `c` consumes a type `p` contributes. The graph is validated once, then a
//! stable topological order is computed with Kahn's algorithm, always taking
//! the ready vertex that was declared first.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::dot::{Config as DotConfig, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::error::ContainerError;
use super::provider::TypeKey;

/// What the graph needs to know about a constructor.
#[derive(Debug, Clone)]
pub(crate) struct Vertex {
    pub(crate) module: usize,
    pub(crate) name: String,
    pub(crate) inputs: Vec<TypeKey>,
    pub(crate) outputs: Vec<TypeKey>,
}

#[derive(Debug)]
pub(crate) struct DependencyGraph {
    graph: DiGraph<usize, TypeKey>,
}

impl DependencyGraph {
    /// Validate the type relation and build the graph. `ambient` types are
    /// supplied by the container itself and need no provider.
    pub(crate) fn build(
        vertices: &[Vertex],
        module_ids: &[String],
        ambient: &[TypeKey],
    ) -> Result<Self, ContainerError> {
        let describe = |index: usize| {
            let vertex = &vertices[index];
            format!("{} in module {:?}", vertex.name, module_ids[vertex.module])
        };

        let mut producers: HashMap<TypeKey, usize> = HashMap::new();
        for (index, vertex) in vertices.iter().enumerate() {
            for output in &vertex.outputs {
                if ambient.contains(output) {
                    return Err(ContainerError::AmbiguousType {
                        type_name: output.short_name(),
                        first: "the container".to_string(),
                        second: describe(index),
                    });
                }
                match producers.entry(*output) {
                    Entry::Occupied(existing) => {
                        return Err(ContainerError::AmbiguousType {
                            type_name: output.short_name(),
                            first: describe(*existing.get()),
                            second: describe(index),
                        });
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(index);
                    }
                }
            }
        }

        let mut graph = DiGraph::with_capacity(vertices.len(), vertices.len());
        for index in 0..vertices.len() {
            graph.add_node(index);
        }
        for (consumer, vertex) in vertices.iter().enumerate() {
            for input in &vertex.inputs {
                match producers.get(input) {
                    Some(&producer) => {
                        graph.add_edge(NodeIndex::new(producer), NodeIndex::new(consumer), *input);
                    }
                    None if ambient.contains(input) => {}
                    None => {
                        return Err(ContainerError::MissingType {
                            node: vertex.name.clone(),
                            module: module_ids[vertex.module].clone(),
                            type_name: input.short_name(),
                        });
                    }
                }
            }
        }

        let dependency_graph = Self { graph };
        if let Some(cycle) = dependency_graph.find_cycle() {
            let members: Vec<String> = cycle.into_iter().map(describe).collect();
            return Err(ContainerError::Cycle(members.join(", ")));
        }
        Ok(dependency_graph)
    }

    /// Members of the first strongly connected component that forms a
    /// cycle, in declaration order.
    fn find_cycle(&self) -> Option<Vec<usize>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&node| self.graph.contains_edge(node, node))
            })
            .map(|component| {
                let mut members: Vec<usize> =
                    component.into_iter().map(|node| node.index()).collect();
                members.sort_unstable();
                members
            })
            .min()
    }

    /// Stable topological order: producers before consumers, ties broken by
    /// declaration order.
    pub(crate) fn order(&self) -> Vec<usize> {
        let mut pending: Vec<usize> = self
            .graph
            .node_indices()
            .map(|node| self.graph.edges_directed(node, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(pending.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for consumer in self
                .graph
                .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            {
                let slot = &mut pending[consumer.index()];
                *slot -= 1;
                if *slot == 0 {
                    ready.push(Reverse(consumer.index()));
                }
            }
        }
        order
    }

    /// Modules whose constructors a given module's constructors consume,
    /// as `(consumer module, producer module)` pairs without duplicates.
    pub(crate) fn module_edges(&self, vertices: &[Vertex]) -> Vec<(usize, usize)> {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for edge in self.graph.raw_edges() {
            let producer = vertices[edge.source().index()].module;
            let consumer = vertices[edge.target().index()].module;
            if producer != consumer && seen.insert((consumer, producer)) {
                edges.push((consumer, producer));
            }
        }
        edges.sort_unstable();
        edges
    }

    /// DOT rendering with one node per module and an edge from each
    /// consuming module to the module it depends on.
    pub(crate) fn to_dot(&self, vertices: &[Vertex], module_ids: &[String]) -> String {
        let mut modules: DiGraph<&str, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = module_ids
            .iter()
            .map(|id| modules.add_node(id.as_str()))
            .collect();
        for (consumer, producer) in self.module_edges(vertices) {
            modules.update_edge(nodes[consumer], nodes[producer], ());
        }

        let dot = Dot::with_attr_getters(
            &modules,
            &[DotConfig::NodeNoLabel, DotConfig::EdgeNoLabel],
            &|_, _| String::new(),
            &|_, (_, id)| format!("label = \"{}\" ", escape_label(id)),
        );
        format!("{dot:?}")
    }
}

/// Quote-safe DOT string contents.
fn escape_label(id: &str) -> String {
    id.replace('\\', "\\\\").replace('"', "\\\"")
}
