use std::collections::HashMap;

use petgraph::{
    algo::connected_components,
    graph::{NodeIndex, UnGraph},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::network::{
    edge::{EdgeReason, TopologyEdge},
    router::{Router, RouterId},
};

/// Nodes and edges of one discovery run, as handed to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub run_id: Uuid,
    pub nodes: Vec<Router>,
    pub edges: Vec<TopologyEdge>,
}

/// Undirected graph view over a snapshot.
///
/// Only nodes classified as routers are placed in the graph; edges whose endpoints are
/// missing are ignored rather than causing a panic.
pub struct NetworkGraph {
    pub graph: UnGraph<Router, EdgeReason>,
    pub node_id_to_index_map: HashMap<RouterId, NodeIndex>,
}

impl NetworkGraph {
    pub fn build_new(snapshot: &TopologySnapshot) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut node_id_to_index_map = HashMap::new();
        for router in snapshot.nodes.iter().filter(|r| r.is_router) {
            let index = graph.add_node(router.clone());
            node_id_to_index_map.insert(router.id, index);
        }

        for edge in &snapshot.edges {
            if let (Some(&from), Some(&to)) = (
                node_id_to_index_map.get(&edge.from_router_id),
                node_id_to_index_map.get(&edge.to_router_id),
            ) {
                graph.add_edge(from, to, edge.reason);
            }
        }

        Self {
            graph,
            node_id_to_index_map,
        }
    }

    pub fn router_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of disconnected router islands; more than one usually means a probe gap.
    pub fn component_count(&self) -> usize {
        connected_components(&self.graph)
    }

    pub fn neighbors(&self, router_id: RouterId) -> Vec<&Router> {
        let Some(&index) = self.node_id_to_index_map.get(&router_id) else {
            return Vec::new();
        };
        let mut out: Vec<&Router> = self
            .graph
            .neighbors(index)
            .filter_map(|n| self.graph.node_weight(n))
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }
}
