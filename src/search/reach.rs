use std::collections::hash_map::Entry;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::graph::{DirectedEdge, GraphReader, GraphTile, NodeInfo};
use crate::search::handler::BinHandler;

impl<'a, R, EF, NF> BinHandler<'a, R, EF, NF>
where
    R: GraphReader,
    EF: Fn(&DirectedEdge) -> f64,
    NF: Fn(&NodeInfo) -> bool,
{
    /// Island-size estimate for the edge's end node, probing the graph when
    /// nothing is known yet.
    ///
    /// The probe is skipped while every projector in the run already holds a
    /// reachable candidate: paying for island checks on worse candidates is
    /// wasted work, so reachability is assumed satisfied.
    pub(super) fn check_reachability(&mut self, range: &Range<usize>, edge: &DirectedEdge) -> u32 {
        // fixed at zero when no input asks for the check
        if self.max_reach_limit == 0 {
            return 0;
        }

        if let Some(&slot) = self.reach_indices.get(&edge.end_node) {
            return self.reaches[slot].min(self.max_reach_limit);
        }

        let needed = self.projectors[range.clone()]
            .iter()
            .any(|projector| projector.reachable.is_empty());
        if !needed {
            return self.max_reach_limit;
        }

        if self.interrupted() {
            self.aborted = true;
            return 0;
        }

        // an edge whose end node can't be fetched can't be left either
        let Some((tile, node)) = self.reader.end_node(edge) else {
            return 0;
        };

        // the slot index doubles as the probe's identity; a collision with
        // an older probe changes it, which is how the unwind is detected
        let mut slot = self.reaches.len();
        self.reaches.push(0);
        debug!("reachability probe from {:?}", edge.end_node);
        self.expand(&tile, node, &mut slot);

        let count = self.reaches[self.reaches.len() - 1];
        count.min(self.max_reach_limit)
    }

    /// Bounded depth-first expansion counting distinct end nodes, stopping
    /// once the probe's counter reaches the limit.
    fn expand(&mut self, tile: &Arc<GraphTile>, node: NodeInfo, slot: &mut usize) {
        for i in 0..node.edge_count {
            if self.reaches[self.reaches.len() - 1] >= self.max_reach_limit {
                return;
            }

            let Some(edge) = tile.directed_edge_at(node.edge_index as u64 + i as u64).copied() else {
                return;
            };
            if (self.edge_filter)(&edge) == 0.0 {
                continue;
            }
            let Some((end_tile, end_node)) = self.reader.end_node(&edge) else {
                continue;
            };
            if (self.node_filter)(&end_node) {
                continue;
            }

            match self.reach_indices.entry(edge.end_node) {
                Entry::Occupied(existing) => {
                    let existing = *existing.get();
                    // revisited within this probe
                    if existing == *slot {
                        continue;
                    }
                    // connected to an island found by an earlier probe:
                    // merge the counts, minus one for the shared node, and
                    // write through both slots so cached lookups agree
                    let last = self.reaches.len() - 1;
                    let merged = self.reaches[last] + self.reaches[existing] - 1;
                    self.reaches[last] = merged;
                    self.reaches[existing] = merged;
                    // switch to the older probe's slot, unwinding recursion
                    *slot = existing;
                    return;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(*slot);
                }
            }

            let last = self.reaches.len() - 1;
            self.reaches[last] += 1;

            let previous = *slot;
            self.expand(&end_tile, end_node, slot);
            // a deeper collision merged into an older probe
            if *slot != previous {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::graph::memory::MemoryGraphBuilder;
    use crate::model::Location;
    use crate::search::SearchConfig;

    fn handler_for<'a>(
        graph: &'a crate::MemoryGraph,
        minimum_reachability: u32,
    ) -> BinHandler<'a, crate::MemoryGraph, fn(&DirectedEdge) -> f64, fn(&NodeInfo) -> bool> {
        let mut location = Location::new(0.0005, 0.0001);
        location.minimum_reachability = minimum_reachability;
        BinHandler::new(
            &SearchConfig::default(),
            graph,
            &[location],
            |_| 1.0,
            |_| false,
            None,
        )
    }

    #[test]
    fn probe_counts_a_small_island_001() {
        // A - B - C, three nodes, two ways
        let mut builder = MemoryGraphBuilder::new();
        builder
            .way(&[(0.0, 0.0), (0.001, 0.0)])
            .way(&[(0.001, 0.0), (0.002, 0.0)]);
        let graph = builder.build().unwrap();

        let mut handler = handler_for(&graph, 50);
        let (forward_id, _) = graph.way(0);
        let tile = graph.tile_containing(forward_id).unwrap();
        let edge = *tile.directed_edge(forward_id).unwrap();

        let range = 0..handler.projectors.len();
        assert_eq!(handler.check_reachability(&range, &edge), 3);

        // every node of the island is cached now
        assert_eq!(handler.reach_indices.len(), 3);
        assert_eq!(handler.get_reach(&edge), Some(3));
    }

    #[test]
    fn probe_stops_at_the_limit_001() {
        // a long chain of nodes, limit far below its size
        let mut builder = MemoryGraphBuilder::new();
        for i in 0..20 {
            let from = i as f64 * 0.001;
            builder.way(&[(from, 0.0), (from + 0.001, 0.0)]);
        }
        let graph = builder.build().unwrap();

        let mut handler = handler_for(&graph, 5);
        let (forward_id, _) = graph.way(0);
        let tile = graph.tile_containing(forward_id).unwrap();
        let edge = *tile.directed_edge(forward_id).unwrap();

        let range = 0..handler.projectors.len();
        assert_eq!(handler.check_reachability(&range, &edge), 5);
        // the expansion stopped instead of crawling all 21 nodes
        assert!(handler.reach_indices.len() <= 6);
    }

    #[test]
    fn probe_disabled_when_no_input_asks_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0), (0.001, 0.0)]);
        let graph = builder.build().unwrap();

        let mut handler = handler_for(&graph, 0);
        let (forward_id, _) = graph.way(0);
        let tile = graph.tile_containing(forward_id).unwrap();
        let edge = *tile.directed_edge(forward_id).unwrap();

        let range = 0..handler.projectors.len();
        assert_eq!(handler.check_reachability(&range, &edge), 0);
        assert!(handler.reach_indices.is_empty());
    }

    #[test]
    fn probe_assumes_reachable_once_everyone_has_candidates_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0), (0.001, 0.0)]);
        let graph = builder.build().unwrap();

        // the two-node island satisfies a minimum reachability of 2, so the
        // search leaves a candidate in the reachable list
        let mut handler = handler_for(&graph, 2);
        handler.search();
        assert!(!handler.projectors[0].reachable.is_empty());

        // with every projector satisfied, an unknown edge is assumed fine
        // without probing
        let (forward_id, _) = graph.way(0);
        let tile = graph.tile_containing(forward_id).unwrap();
        let edge = *tile.directed_edge(forward_id).unwrap();

        let probes = handler.reaches.len();
        let range = 0..handler.projectors.len();
        handler.reach_indices.clear();
        assert_eq!(handler.check_reachability(&range, &edge), 2);
        assert_eq!(handler.reaches.len(), probes);
    }

    #[test]
    fn merged_probes_agree_on_the_count_001() {
        // A - B - C - D chain
        let mut builder = MemoryGraphBuilder::new();
        builder
            .way(&[(0.0, 0.0), (0.001, 0.0)])
            .way(&[(0.001, 0.0), (0.002, 0.0)])
            .way(&[(0.002, 0.0), (0.003, 0.0)]);
        let graph = builder.build().unwrap();

        // limit 2 leaves the first probe's island partially explored
        let mut handler = handler_for(&graph, 2);
        let tile = graph.tile_containing(graph.way(0).0).unwrap();
        let a_to_b = *tile.directed_edge(graph.way(0).0).unwrap();
        let range = 0..handler.projectors.len();
        assert_eq!(handler.check_reachability(&range, &a_to_b), 2);

        // the second probe starts further down the chain and collides with
        // the first one
        let c_tile = graph.tile_containing(graph.way(2).0).unwrap();
        let c_to_d = *c_tile.directed_edge(graph.way(2).0).unwrap();
        let before: Vec<u32> = handler.reaches.clone();
        let merged = handler.check_reachability(&range, &c_to_d);
        assert_eq!(merged, 2, "merged count is capped at the limit");

        // the merge wrote through to the older slot, never decreasing it
        assert!(handler.reaches[0] >= before[0]);
    }
}
