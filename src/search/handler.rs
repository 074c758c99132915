use std::ops::Range;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::graph::{DirectedEdge, GraphReader, GraphTile, NodeInfo};
use crate::model::{GraphId, Location};
use crate::search::SearchConfig;
use crate::search::projector::{BinCandidate, Candidate, Projector};

/// Drives the whole correlation: owns the projectors and handles one bin at
/// a time for every projector currently looking at it.
pub(crate) struct BinHandler<'a, R, EF, NF> {
    pub(super) config: SearchConfig,
    pub(super) reader: &'a R,
    pub(super) edge_filter: EF,
    pub(super) node_filter: NF,
    pub(super) interrupt: Option<&'a dyn Fn() -> bool>,
    pub(super) aborted: bool,
    pub(super) max_reach_limit: u32,
    pub(super) projectors: Vec<Projector>,
    /// Scratch: the best projection per projector for the edge in hand.
    bin_candidates: Vec<BinCandidate>,
    /// Island sizes, one slot per initiated reachability probe. Merged
    /// islands write through to the older slot so cached lookups stay valid.
    pub(super) reaches: Vec<u32>,
    /// End node to reach slot. Process-local to one search call.
    pub(super) reach_indices: FxHashMap<GraphId, usize>,
}

impl<'a, R, EF, NF> BinHandler<'a, R, EF, NF>
where
    R: GraphReader,
    EF: Fn(&DirectedEdge) -> f64,
    NF: Fn(&NodeInfo) -> bool,
{
    pub(crate) fn new(
        config: &SearchConfig,
        reader: &'a R,
        locations: &[Location],
        edge_filter: EF,
        node_filter: NF,
        interrupt: Option<&'a dyn Fn() -> bool>,
    ) -> Self {
        // search each unique input once, in first-seen order
        let mut seen = FxHashSet::default();
        let mut projectors = Vec::with_capacity(locations.len());
        let mut max_reach_limit = 0;
        for &location in locations {
            if seen.insert(location) {
                max_reach_limit = max_reach_limit.max(location.minimum_reachability);
                projectors.push(Projector::new(location, reader, config));
            }
        }

        let reach_reserve = max_reach_limit.max(1) as usize * 1024;
        Self {
            config: *config,
            reader,
            edge_filter,
            node_filter,
            interrupt,
            aborted: false,
            max_reach_limit,
            bin_candidates: vec![BinCandidate::default(); projectors.len()],
            projectors,
            reaches: Vec::with_capacity(reach_reserve),
            reach_indices: FxHashMap::with_capacity_and_hasher(reach_reserve, Default::default()),
        }
    }

    pub(super) fn interrupted(&self) -> bool {
        self.interrupt.is_some_and(|check| check())
    }

    /// Round loop: keep the projectors sorted so equal bins are adjacent,
    /// handle the longest run sharing a bin, re-sort, until every projector
    /// has finished.
    pub(crate) fn search(&mut self) {
        self.projectors.sort_unstable_by(|a, b| a.compare_bins(b));
        while self.projectors.first().is_some_and(Projector::has_bin) {
            if self.interrupted() {
                self.aborted = true;
                return;
            }
            let range = self.find_best_range();
            self.handle_bin(range);
            self.projectors.sort_unstable_by(|a, b| a.compare_bins(b));
        }
    }

    /// The longest run of consecutive projectors sharing the same bin.
    /// Assumes the projectors are sorted; finished runs never win.
    fn find_best_range(&self) -> Range<usize> {
        let mut best = 0..0;
        let mut start = 0;
        while start < self.projectors.len() {
            let run = self.projectors[start..]
                .iter()
                .take_while(|p| self.projectors[start].has_same_bin(p))
                .count();
            if self.projectors[start].has_bin() && run > best.len() {
                best = start..start + run;
            }
            start += run;
        }
        best
    }

    /// Resolves a bin entry to a usable directed edge. When the edge itself
    /// fails the filter its twin gets a chance and, if it passes, becomes
    /// the candidate in its place.
    fn usable_edge(&self, id: GraphId) -> Option<(GraphId, DirectedEdge, Arc<GraphTile>)> {
        let tile = self.reader.tile_containing(id)?;
        let edge = *tile.directed_edge(id)?;
        if (self.edge_filter)(&edge) != 0.0 {
            return Some((id, edge, tile));
        }

        let (opposing_id, opposing_tile) = self.reader.opposing_edge_id(id)?;
        let opposing = *opposing_tile.directed_edge(opposing_id)?;
        if (self.edge_filter)(&opposing) != 0.0 {
            Some((opposing_id, opposing, opposing_tile))
        } else {
            None
        }
    }

    /// Handles one bin for every projector in the run, then advances them
    /// all to their next bins.
    fn handle_bin(&mut self, range: Range<usize>) {
        let Some(bin_tile) = self.projectors[range.start].tile.clone() else {
            return;
        };
        let bin_index = self.projectors[range.start].bin_index;
        trace!(
            "handling bin {bin_index} of {:?} for {} projectors",
            bin_tile.id(),
            range.len()
        );

        for &bin_entry in bin_tile.bin(bin_index) {
            // bins may reference edges of neighbouring tiles
            let Some((edge_id, edge, tile)) = self.usable_edge(bin_entry) else {
                continue;
            };

            let reachability = self.check_reachability(&range, &edge);

            let info = tile.edge_info(&edge);
            let shape = info.shape();

            for candidate in &mut self.bin_candidates[..range.len()] {
                candidate.reset();
            }

            // walk the shape once, projecting every input onto each segment;
            // inputs are innermost so the segment endpoints stay in cache
            {
                let scratch = &mut self.bin_candidates;
                let projectors = &self.projectors;
                for i in 0..shape.len() - 1 {
                    let u = shape[i];
                    let v = shape[i + 1];
                    for (offset, candidate) in scratch[..range.len()].iter_mut().enumerate() {
                        let projector = &projectors[range.start + offset];
                        let point = projector.project(u, v);
                        let sq_distance = projector.approx.distance_squared(point);
                        if sq_distance < candidate.sq_distance {
                            candidate.sq_distance = sq_distance;
                            candidate.point = point;
                            candidate.index = i;
                        }
                    }
                }
            }

            // keep the best point along this edge where it makes sense
            for offset in 0..range.len() {
                let best = self.bin_candidates[offset];
                let projector = &mut self.projectors[range.start + offset];

                let batch = if reachability < projector.location.minimum_reachability {
                    &mut projector.unreachable
                } else {
                    &mut projector.reachable
                };

                let candidate = Candidate {
                    sq_distance: best.sq_distance,
                    point: best.point,
                    index: best.index,
                    edge_id,
                    edge,
                    tile: tile.clone(),
                };

                let last_sq_distance = match batch.last() {
                    Some(last) => last.sq_distance,
                    None => {
                        batch.push(candidate);
                        continue;
                    }
                };

                let in_radius = best.sq_distance < projector.sq_radius;
                let better = best.sq_distance < last_sq_distance;
                let last_in_radius = last_sq_distance < projector.sq_radius;

                // it has to be better or inside the radius to be kept at all
                if !in_radius && !better {
                    continue;
                }
                if !last_in_radius {
                    // the old best was outside the radius and worse, drop it
                    let last = batch.len() - 1;
                    batch[last] = candidate;
                } else if better {
                    // new best goes on the end
                    batch.push(candidate);
                } else {
                    // worse but in radius: keep it just before the best
                    batch.push(candidate);
                    let len = batch.len();
                    batch.swap(len - 1, len - 2);
                }
            }
        }

        // bin is done, everyone moves on
        let reader = self.reader;
        let config = self.config;
        for projector in &mut self.projectors[range] {
            projector.next_bin(reader, &config);
        }
    }

    /// Island size recorded for the edge's end node, None when no probe ever
    /// ran there.
    pub(super) fn get_reach(&self, edge: &DirectedEdge) -> Option<u32> {
        self.reach_indices
            .get(&edge.end_node)
            .map(|&slot| self.reaches[slot])
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::graph::memory::MemoryGraphBuilder;

    fn config() -> SearchConfig {
        SearchConfig::default()
    }

    #[test]
    fn duplicate_locations_share_a_projector_001() {
        let graph = MemoryGraphBuilder::new().build().unwrap();
        let location = Location::new(0.0005, 0.0001);

        let handler = BinHandler::new(
            &config(),
            &graph,
            &[location, location, location],
            |_| 1.0,
            |_| false,
            None,
        );
        assert_eq!(handler.projectors.len(), 1);
    }

    #[test]
    fn candidate_lists_keep_the_best_last_001() {
        // three parallel roads at increasing distance from the input
        let mut builder = MemoryGraphBuilder::new();
        builder
            .way(&[(0.0, 0.0), (0.001, 0.0)])
            .way(&[(0.0, 0.0002), (0.001, 0.0002)])
            .way(&[(0.0, 0.0004), (0.001, 0.0004)]);
        let graph = builder.build().unwrap();

        let mut location = Location::new(0.0005, 0.0);
        location.radius = 100.0;

        let mut handler =
            BinHandler::new(&config(), &graph, &[location], |_| 1.0, |_| false, None);
        handler.search();

        let reachable = &handler.projectors[0].reachable;
        assert!(reachable.len() > 1, "radius should admit several candidates");

        let best = reachable.last().unwrap();
        for candidate in &reachable[..reachable.len() - 1] {
            assert!(candidate.sq_distance >= best.sq_distance);
            assert!(candidate.sq_distance < location.radius * location.radius);
        }
        assert_eq!(best.edge_id, graph.way(0).0);
    }

    #[test]
    fn unusable_edges_fall_back_to_their_twin_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0), (0.001, 0.0)]);
        let graph = builder.build().unwrap();
        let (forward_id, reverse_id) = graph.way(0);

        let mut handler = BinHandler::new(
            &config(),
            &graph,
            &[Location::new(0.0005, 0.0001)],
            move |edge| if edge.forward { 0.0 } else { 1.0 },
            |_| false,
            None,
        );
        handler.search();

        let reachable = &handler.projectors[0].reachable;
        assert_eq!(reachable.len(), 1);
        assert_eq!(reachable[0].edge_id, reverse_id);
        assert_ne!(reachable[0].edge_id, forward_id);
    }

    #[test]
    fn finished_projectors_sort_last_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0), (0.001, 0.0)]);
        let graph = builder.build().unwrap();

        // one input near the road, one in the middle of nowhere
        let near = Location::new(0.0005, 0.0001);
        let nowhere = Location::new(10.0, 10.0);

        let mut handler =
            BinHandler::new(&config(), &graph, &[nowhere, near], |_| 1.0, |_| false, None);
        handler.search();

        assert!(handler.projectors.iter().all(|p| !p.has_bin()));
        assert!(handler.projectors[0].reachable.len() + handler.projectors[1].reachable.len() > 0);
    }
}
