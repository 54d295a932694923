// 進路圖：r_graph 為所有道岔位置下可能的進路銜接，p_graph 為物理連通關係
// 只用於判斷可達性，不參與每個周期的計算

use log::warn;
use petgraph::{
    algo,
    graphmap::{DiGraphMap, UnGraphMap},
};

use super::topo::{Element, Network, NodeId, RouteId, TrackId};

//站場圖
pub(crate) struct StationGraph {
    pub(crate) r_graph: DiGraphMap<RouteId, ()>,
    pub(crate) p_graph: UnGraphMap<NodeId, TrackId>,
}

impl StationGraph {
    pub(crate) fn new(net: &Network) -> Self {
        let mut r_graph = DiGraphMap::new();
        let mut p_graph = UnGraphMap::new();

        for (id, node) in net.nodes.iter().enumerate() {
            p_graph.add_node(id);
            for slot in &node.slots {
                r_graph.add_node(slot.outcome);
                r_graph.add_node(slot.outcome.opposite());
            }
        }

        for (t, track) in net.tracks.iter().enumerate() {
            p_graph.add_edge(track.ends[0].node, track.ends[1].node, t);
        }

        for node in &net.nodes {
            if let Element::Line = node.element {
                continue;
            }
            for (income, slot) in node.slots.iter().enumerate() {
                for out in node.element.any_wiring(income) {
                    r_graph.add_edge(slot.outcome.opposite(), node.slots[out].outcome, ());
                }
            }
        }

        let parts = algo::connected_components(&p_graph);
        if parts > 1 {
            warn!("station {} is split into {} disconnected parts", net.title, parts);
        }

        StationGraph { r_graph, p_graph }
    }

    //可能な進路を探す
    //不考慮道岔當前位置
    pub(crate) fn available_path(
        &self,
        net: &Network,
        start: RouteId,
        goal: NodeId,
    ) -> Option<(f64, Vec<RouteId>)> {
        algo::astar(
            &self.r_graph,
            start,
            |r| net.end_of(r).node == goal,
            |(_, next, _)| net.length(next),
            |_| 0.,
        )
    }

    pub(crate) fn can_reach(&self, net: &Network, start: RouteId, goal: NodeId) -> bool {
        self.available_path(net, start, goal).is_some()
    }
}
