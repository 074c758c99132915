//! In-memory graph for tests, demos and small embeddings.
//!
//! [`MemoryGraphBuilder`] accepts bidirectional ways as polylines and turns
//! them into frozen tiles: every way becomes a pair of directed twins sharing
//! one shape record, edges are grouped contiguously behind their start node,
//! opposing-edge links are resolved, and each tile's spatial bins are filled
//! by sampling the shapes.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::GraphError;
use crate::geometry;
use crate::graph::{DirectedEdge, EdgeInfo, GraphReader, GraphTile, NodeInfo};
use crate::model::{Coordinate, GraphId};
use crate::tiles::{BIN_COUNT, Tiling};

/// A fully built graph serving tiles from memory.
#[derive(Debug)]
pub struct MemoryGraph {
    tiles: FxHashMap<GraphId, Arc<GraphTile>>,
    ways: Vec<(GraphId, GraphId)>,
    nodes: FxHashMap<(u64, u64), GraphId>,
}

impl MemoryGraph {
    /// The (forward, reverse) directed edge ids created for the nth way.
    pub fn way(&self, index: usize) -> (GraphId, GraphId) {
        self.ways[index]
    }

    /// The node created at the given way endpoint, if any.
    pub fn node_at(&self, lon: f64, lat: f64) -> Option<GraphId> {
        self.nodes.get(&(lon.to_bits(), lat.to_bits())).copied()
    }
}

impl GraphReader for MemoryGraph {
    fn tile(&self, id: GraphId) -> Option<Arc<GraphTile>> {
        self.tiles.get(&id.tile_base()).cloned()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingEdge {
    start: GraphId,
    end: GraphId,
    way: usize,
    forward: bool,
}

#[derive(Debug, Default)]
struct TileData {
    nodes: Vec<Coordinate>,
    pending: Vec<PendingEdge>,
}

/// Collects ways and freezes them into a [`MemoryGraph`].
#[derive(Debug, Default)]
pub struct MemoryGraphBuilder {
    tiling: Tiling,
    ways: Vec<Vec<Coordinate>>,
}

impl MemoryGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bidirectional way along the given (lon, lat) polyline. Ways
    /// sharing an endpoint coordinate share the node created there.
    pub fn way(&mut self, shape: &[(f64, f64)]) -> &mut Self {
        self.ways
            .push(shape.iter().map(|&(lon, lat)| Coordinate::new(lon, lat)).collect());
        self
    }

    pub fn build(&self) -> Result<MemoryGraph, GraphError> {
        let tiling = self.tiling;
        let mut tiles: FxHashMap<GraphId, TileData> = FxHashMap::default();
        let mut nodes: FxHashMap<(u64, u64), GraphId> = FxHashMap::default();

        // intern endpoint nodes and collect one pending edge per direction
        for (way, shape) in self.ways.iter().enumerate() {
            if shape.len() < 2 {
                return Err(GraphError::DegenerateShape);
            }
            let first = shape[0];
            let last = shape[shape.len() - 1];
            let node_a = intern_node(&mut tiles, &mut nodes, &tiling, first);
            let node_b = intern_node(&mut tiles, &mut nodes, &tiling, last);

            tiles.entry(node_a.tile_base()).or_default().pending.push(PendingEdge {
                start: node_a,
                end: node_b,
                way,
                forward: true,
            });
            tiles.entry(node_b.tile_base()).or_default().pending.push(PendingEdge {
                start: node_b,
                end: node_a,
                way,
                forward: false,
            });
        }

        // group edges contiguously behind their start node and assign ids
        let mut way_edges = vec![(GraphId::default(), GraphId::default()); self.ways.len()];
        let mut node_ranges: FxHashMap<GraphId, (u32, u32)> = FxHashMap::default();

        for (&tile_id, tile) in &mut tiles {
            tile.pending.sort_by_key(|edge| edge.start.index());

            for (position, edge) in tile.pending.iter().enumerate() {
                let id = tile_id.with_index(position as u64);
                let slot = &mut way_edges[edge.way];
                if edge.forward {
                    slot.0 = id;
                } else {
                    slot.1 = id;
                }

                let range = node_ranges.entry(edge.start).or_insert((position as u32, 0));
                range.1 += 1;
            }
        }

        // resolve directed edge records now that every id is known
        let mut lengths = Vec::with_capacity(self.ways.len());
        for shape in &self.ways {
            let length = shape
                .windows(2)
                .map(|pair| geometry::distance(pair[0], pair[1]))
                .sum();
            lengths.push(length);
        }

        let mut frozen = FxHashMap::default();
        let tile_ids: Vec<GraphId> = tiles.keys().copied().collect();

        for tile_id in &tile_ids {
            let data = &tiles[tile_id];
            let mut edges = Vec::with_capacity(data.pending.len());
            let mut infos = Vec::new();
            let mut info_by_way: FxHashMap<usize, u32> = FxHashMap::default();

            for pending in &data.pending {
                let edge_info_index = match info_by_way.get(&pending.way) {
                    Some(&index) => index,
                    None => {
                        let index = infos.len() as u32;
                        infos.push(EdgeInfo::new(self.ways[pending.way].clone())?);
                        info_by_way.insert(pending.way, index);
                        index
                    }
                };

                let (forward_id, reverse_id) = way_edges[pending.way];
                let opposing = if pending.forward { reverse_id } else { forward_id };
                let end_range = node_ranges[&pending.end];

                edges.push(DirectedEdge {
                    forward: pending.forward,
                    length: lengths[pending.way],
                    end_node: pending.end,
                    edge_info_index,
                    opp_index: opposing.index() as u32 - end_range.0,
                    transition: false,
                });
            }

            let node_infos: Vec<NodeInfo> = data
                .nodes
                .iter()
                .enumerate()
                .map(|(index, &point)| {
                    let id = tile_id.with_index(index as u64);
                    let (edge_index, edge_count) = node_ranges.get(&id).copied().unwrap_or((0, 0));
                    NodeInfo {
                        point,
                        edge_index,
                        edge_count,
                    }
                })
                .collect();

            frozen.insert(*tile_id, (node_infos, edges, infos));
        }

        // register each way's forward edge in every bin its shape touches,
        // creating pass-through tiles where the shape leaves its own tiles
        let mut bins: FxHashMap<GraphId, Vec<Vec<GraphId>>> = FxHashMap::default();
        for (way, shape) in self.ways.iter().enumerate() {
            let edge_id = way_edges[way].0;
            for point in sample_shape(shape, tiling.bin_sample_step()) {
                let (tile_id, bin) = tiling.bin_of(point);
                let tile_bins = bins
                    .entry(tile_id)
                    .or_insert_with(|| vec![vec![]; BIN_COUNT]);
                let bin = &mut tile_bins[bin as usize];
                if !bin.contains(&edge_id) {
                    bin.push(edge_id);
                }
            }
        }

        let mut graph_tiles = FxHashMap::default();
        for tile_id in bins.keys() {
            frozen.entry(*tile_id).or_insert_with(|| (vec![], vec![], vec![]));
        }
        for (tile_id, (node_infos, edges, infos)) in frozen {
            let tile_bins = bins.remove(&tile_id).unwrap_or_else(|| vec![vec![]; BIN_COUNT]);
            let tile = GraphTile::new(tile_id, node_infos, edges, infos, tile_bins)?;
            graph_tiles.insert(tile_id, Arc::new(tile));
        }

        Ok(MemoryGraph {
            tiles: graph_tiles,
            ways: way_edges,
            nodes,
        })
    }
}

fn intern_node(
    tiles: &mut FxHashMap<GraphId, TileData>,
    nodes: &mut FxHashMap<(u64, u64), GraphId>,
    tiling: &Tiling,
    point: Coordinate,
) -> GraphId {
    let key = (point.lon.to_bits(), point.lat.to_bits());
    if let Some(&id) = nodes.get(&key) {
        return id;
    }
    let tile_id = tiling.tile_of(point);
    let tile = tiles.entry(tile_id).or_default();
    let id = tile_id.with_index(tile.nodes.len() as u64);
    tile.nodes.push(point);
    nodes.insert(key, id);
    id
}

/// Walks the polyline yielding every vertex plus interpolated points no
/// further apart than the given degree step in either axis.
fn sample_shape(shape: &[Coordinate], step: f64) -> Vec<Coordinate> {
    let mut points = vec![shape[0]];
    for pair in shape.windows(2) {
        let [u, v] = [pair[0], pair[1]];
        let span = (v.lon - u.lon).abs().max((v.lat - u.lat).abs());
        let segments = (span / step).ceil().max(1.0) as usize;
        for i in 1..=segments {
            points.push(geometry::interpolate(u, v, i as f64 / segments as f64));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn builder_links_opposing_twins_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0), (0.001, 0.0)]);
        let graph = builder.build().unwrap();

        let (forward_id, reverse_id) = graph.way(0);
        let forward = graph.tile_containing(forward_id).unwrap();
        let forward_edge = *forward.directed_edge(forward_id).unwrap();
        assert!(forward_edge.forward);

        let (opposing, tile) = graph.opposing_edge_id(forward_id).unwrap();
        assert_eq!(opposing, reverse_id);
        let reverse_edge = *tile.directed_edge(opposing).unwrap();
        assert!(!reverse_edge.forward);

        // the twins point at each other
        let (back, _) = graph.opposing_edge_id(opposing).unwrap();
        assert_eq!(back, forward_id);

        // and connect the two endpoint nodes
        assert_eq!(reverse_edge.end_node, graph.node_at(0.0, 0.0).unwrap());
        assert_eq!(forward_edge.end_node, graph.node_at(0.001, 0.0).unwrap());
    }

    #[test]
    fn builder_shares_nodes_between_ways_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder
            .way(&[(0.0, 0.0), (0.001, 0.0)])
            .way(&[(0.001, 0.0), (0.002, 0.0)]);
        let graph = builder.build().unwrap();

        let (first_forward, _) = graph.way(0);
        let (second_forward, _) = graph.way(1);

        let tile = graph.tile_containing(first_forward).unwrap();
        let first = tile.directed_edge(first_forward).unwrap();
        let shared = graph.node_at(0.001, 0.0).unwrap();
        assert_eq!(first.end_node, shared);

        let second = tile.directed_edge(second_forward).unwrap();
        let node = tile.node(shared).unwrap();
        let range = node.edge_index..node.edge_index + node.edge_count;
        assert!(range.contains(&(second_forward.index() as u32)));
        assert_eq!(node.edge_count, 2);
    }

    #[test]
    fn builder_registers_edges_in_bins_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0), (0.001, 0.0)]);
        let graph = builder.build().unwrap();

        let tiling = Tiling::default();
        let (tile_id, bin) = tiling.bin_of(Coordinate::new(0.0005, 0.0));
        let tile = graph.tile(tile_id).unwrap();
        assert!(tile.bin(bin).contains(&graph.way(0).0));
    }

    #[test]
    fn builder_rejects_degenerate_ways_001() {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0)]);
        assert_eq!(builder.build().err(), Some(GraphError::DegenerateShape));
    }
}
