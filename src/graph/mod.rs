//! Tiled road-graph records and the paging reader abstraction.
//!
//! A graph is a set of [`GraphTile`]s, each owning its nodes, its directed
//! edges, the polyline shapes those edges share, and a raster of spatial bins
//! referencing every edge whose shape touches the bin. Tiles are paged in by
//! a [`GraphReader`], the seam behind which an embedder keeps its own tile
//! cache; the search treats reads as fast cache hits.

pub mod memory;

use std::sync::Arc;

use crate::error::GraphError;
use crate::model::{Coordinate, GraphId};
use crate::tiles::BIN_COUNT;

/// One direction of travel over a physical road segment. Each segment is
/// represented twice, once per direction; the twins share one [`EdgeInfo`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectedEdge {
    /// True when this edge travels in the direction its shape is stored in.
    pub forward: bool,
    /// Length of the edge in meters.
    pub length: f64,
    /// Node this edge ends at, possibly in another tile.
    pub end_node: GraphId,
    /// Index of the shared [`EdgeInfo`] record within the owning tile.
    pub edge_info_index: u32,
    /// Position of the opposing edge within the end node's edge range.
    pub opp_index: u32,
    /// True for edges that switch hierarchy levels instead of traversing a
    /// road.
    pub transition: bool,
}

/// A graph node: a point where edges meet. Its outgoing edges occupy a
/// contiguous range of the owning tile's directed edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeInfo {
    pub point: Coordinate,
    pub edge_index: u32,
    pub edge_count: u32,
}

/// Shape record shared by the two directed twins of a road segment, stored in
/// the forward twin's direction.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    shape: Vec<Coordinate>,
}

impl EdgeInfo {
    pub fn new(shape: Vec<Coordinate>) -> Result<Self, GraphError> {
        if shape.len() < 2 {
            return Err(GraphError::DegenerateShape);
        }
        Ok(Self { shape })
    }

    pub fn shape(&self) -> &[Coordinate] {
        &self.shape
    }
}

/// One tile of the graph.
#[derive(Debug)]
pub struct GraphTile {
    id: GraphId,
    nodes: Vec<NodeInfo>,
    directed_edges: Vec<DirectedEdge>,
    edge_infos: Vec<EdgeInfo>,
    bins: Vec<Vec<GraphId>>,
}

impl GraphTile {
    /// Assembles a tile, validating the cross-references the search relies
    /// on. Bin entries are allowed to reference edges of other tiles and are
    /// therefore not validated here.
    pub fn new(
        id: GraphId,
        nodes: Vec<NodeInfo>,
        directed_edges: Vec<DirectedEdge>,
        edge_infos: Vec<EdgeInfo>,
        bins: Vec<Vec<GraphId>>,
    ) -> Result<Self, GraphError> {
        if id.index() != 0 {
            return Err(GraphError::InvalidTileId);
        }
        if bins.len() != BIN_COUNT {
            return Err(GraphError::InvalidBinCount(BIN_COUNT));
        }
        for node in &nodes {
            if node.edge_index as usize + node.edge_count as usize > directed_edges.len() {
                return Err(GraphError::EdgeRangeOutOfBounds);
            }
        }
        for edge in &directed_edges {
            if edge.edge_info_index as usize >= edge_infos.len() {
                return Err(GraphError::EdgeInfoOutOfBounds);
            }
        }
        Ok(Self {
            id,
            nodes,
            directed_edges,
            edge_infos,
            bins,
        })
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn node(&self, id: GraphId) -> Option<&NodeInfo> {
        if id.tile_base() != self.id {
            return None;
        }
        self.nodes.get(id.index() as usize)
    }

    pub fn directed_edge(&self, id: GraphId) -> Option<&DirectedEdge> {
        if id.tile_base() != self.id {
            return None;
        }
        self.directed_edges.get(id.index() as usize)
    }

    pub fn directed_edge_at(&self, index: u64) -> Option<&DirectedEdge> {
        self.directed_edges.get(index as usize)
    }

    pub fn edge_info(&self, edge: &DirectedEdge) -> &EdgeInfo {
        &self.edge_infos[edge.edge_info_index as usize]
    }

    /// Edge ids referenced by the given bin, empty for an out-of-range index.
    pub fn bin(&self, index: u8) -> &[GraphId] {
        self.bins.get(index as usize).map_or(&[], Vec::as_slice)
    }
}

/// Pages graph tiles by id. Implementations are expected to cache: the
/// search issues many reads for the same few tiles and treats each as a fast
/// cache hit. Concurrent readers must be safe; the search never writes.
pub trait GraphReader {
    /// Fetches a tile by its tile-base id. Returns None when the tile does
    /// not exist, which the search treats as "nothing there".
    fn tile(&self, id: GraphId) -> Option<Arc<GraphTile>>;

    /// Fetches the tile that owns the given id.
    fn tile_containing(&self, id: GraphId) -> Option<Arc<GraphTile>> {
        self.tile(id.tile_base())
    }

    /// Resolves the opposing twin of a directed edge: the edge leaving this
    /// edge's end node that travels the same segment the other way. Returns
    /// the twin's id together with the tile that owns it.
    fn opposing_edge_id(&self, id: GraphId) -> Option<(GraphId, Arc<GraphTile>)> {
        let tile = self.tile_containing(id)?;
        let edge = tile.directed_edge(id)?;
        let end_tile = if edge.end_node.tile_base() == tile.id() {
            tile.clone()
        } else {
            self.tile_containing(edge.end_node)?
        };
        let node = end_tile.node(edge.end_node)?;
        let opposing = end_tile
            .id()
            .with_index(node.edge_index as u64 + edge.opp_index as u64);
        Some((opposing, end_tile))
    }

    /// Looks up the end node of a directed edge together with its tile.
    fn end_node(&self, edge: &DirectedEdge) -> Option<(Arc<GraphTile>, NodeInfo)> {
        let tile = self.tile_containing(edge.end_node)?;
        let node = *tile.node(edge.end_node)?;
        Some((tile, node))
    }
}
