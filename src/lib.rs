#![doc = include_str!("../README.md")]

mod error;
mod geometry;
pub mod graph;
mod model;
mod search;
mod tiles;

pub use error::GraphError;
pub use graph::memory::{MemoryGraph, MemoryGraphBuilder};
pub use graph::{DirectedEdge, EdgeInfo, GraphReader, GraphTile, NodeInfo};
pub use model::{Coordinate, Correlation, GraphId, Location, PathEdge, SideOfStreet, StopType};
pub use search::{SearchConfig, search, search_with_interrupt};
pub use tiles::{BIN_COUNT, CORRELATION_LEVEL, Tiling};
