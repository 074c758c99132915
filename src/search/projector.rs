use std::cmp::Ordering;
use std::sync::Arc;

use crate::geometry::{self, DistanceApproximator};
use crate::graph::{DirectedEdge, EdgeInfo, GraphReader, GraphTile};
use crate::model::{Coordinate, GraphId, Location, SideOfStreet};
use crate::search::SearchConfig;
use crate::tiles::{ClosestBins, Tiling};

/// One projection of an input onto one directed edge: the best point along
/// that edge together with everything needed to correlate it later.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) sq_distance: f64,
    /// Projected point on the edge's shape.
    pub(crate) point: Coordinate,
    /// The projection lies on the segment shape[index] -> shape[index + 1].
    pub(crate) index: usize,
    pub(crate) edge_id: GraphId,
    pub(crate) edge: DirectedEdge,
    pub(crate) tile: Arc<GraphTile>,
}

impl Candidate {
    pub(crate) fn edge_info(&self) -> &EdgeInfo {
        self.tile.edge_info(&self.edge)
    }

    /// Which side of the edge the original input lies on. On the street when
    /// the snap distance is tiny or the projection sits at either end of the
    /// shape.
    pub(crate) fn side_of_street(
        &self,
        original: Coordinate,
        distance: f64,
        config: &SearchConfig,
    ) -> SideOfStreet {
        if distance < config.side_of_street_snap {
            return SideOfStreet::None;
        }

        let shape = self.edge_info().shape();
        if geometry::distance(self.point, shape[0]) < config.side_of_street_snap
            || geometry::distance(self.point, shape[shape.len() - 1]) < config.side_of_street_snap
        {
            return SideOfStreet::None;
        }

        // half-plane test on raw lon/lat; can misclassify on very long
        // segments because the earth's curvature is ignored
        let a = shape[self.index];
        let b = shape[self.index + 1];
        let is_left =
            (b.lon - a.lon) * (original.lat - a.lat) - (b.lat - a.lat) * (original.lon - a.lon) > 0.0;
        if is_left == self.edge.forward {
            SideOfStreet::Left
        } else {
            SideOfStreet::Right
        }
    }
}

/// Scratch slot holding the best projection of one input onto the edge
/// currently being handled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BinCandidate {
    pub(crate) sq_distance: f64,
    pub(crate) point: Coordinate,
    pub(crate) index: usize,
}

impl Default for BinCandidate {
    fn default() -> Self {
        Self {
            sq_distance: f64::MAX,
            point: Coordinate::default(),
            index: 0,
        }
    }
}

impl BinCandidate {
    pub(crate) fn reset(&mut self) {
        self.sq_distance = f64::MAX;
    }
}

/// The projection state of one input location: its bin enumeration, its
/// accumulated candidates and the cached scaling constants that keep the
/// segment projection kernel free of trigonometry.
pub(crate) struct Projector {
    binner: ClosestBins,
    pub(crate) location: Location,
    pub(crate) tile: Option<Arc<GraphTile>>,
    pub(crate) bin_index: u8,
    pub(crate) sq_radius: f64,
    /// Candidates on edges satisfying the input's minimum reachability. The
    /// last element is always the best seen so far; the ones before it are
    /// worse but inside the radius.
    pub(crate) reachable: Vec<Candidate>,
    /// Candidates on island edges, kept as a fallback with the same layout.
    pub(crate) unreachable: Vec<Candidate>,
    pub(crate) approx: DistanceApproximator,
    lon_scale: f64,
    lat: f64,
    lon: f64,
}

impl Projector {
    pub(crate) fn new<R: GraphReader>(location: Location, reader: &R, config: &SearchConfig) -> Self {
        let point = location.point;
        let mut projector = Self {
            binner: Tiling::default().closest_bins(point),
            location,
            tile: None,
            bin_index: 0,
            sq_radius: location.radius * location.radius,
            reachable: Vec::with_capacity(64),
            unreachable: Vec::with_capacity(64),
            approx: DistanceApproximator::new(point),
            lon_scale: point.lat.to_radians().cos(),
            lat: point.lat,
            lon: point.lon,
        };
        projector.next_bin(reader, config);
        projector
    }

    pub(crate) fn has_bin(&self) -> bool {
        self.tile.is_some()
    }

    pub(crate) fn has_same_bin(&self, other: &Self) -> bool {
        match (&self.tile, &other.tile) {
            (Some(a), Some(b)) => a.id() == b.id() && self.bin_index == other.bin_index,
            (None, None) => true,
            _ => false,
        }
    }

    /// Sort order for the round loop: unfinished projectors first, grouped
    /// by (tile, bin) so equal bins end up adjacent; finished ones last.
    pub(crate) fn compare_bins(&self, other: &Self) -> Ordering {
        match (&self.tile, &other.tile) {
            (Some(a), Some(b)) => a
                .id()
                .cmp(&b.id())
                .then_with(|| self.bin_index.cmp(&other.bin_index)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Advances to the next bin worth looking at, skipping bins of missing
    /// tiles. Finishes the projector when the next lower bound exceeds the
    /// cutoff or the best reachable candidate, since no later bin can beat
    /// either.
    pub(crate) fn next_bin<R: GraphReader>(&mut self, reader: &R, config: &SearchConfig) {
        self.tile = None;
        while let Some((tile_id, bin_index, distance)) = self.binner.next() {
            if distance > config.search_cutoff
                || self
                    .reachable
                    .last()
                    .is_some_and(|best| distance > best.sq_distance.sqrt())
            {
                break;
            }
            if let Some(tile) = reader.tile(tile_id) {
                self.bin_index = bin_index;
                self.tile = Some(tile);
                break;
            }
        }
    }

    /// Projects the input onto the segment from `u` to `v` and returns the
    /// closest point. Performance critical: longitudes are planarized with
    /// the cosine cached at construction, and nothing here allocates or
    /// takes a square root.
    pub(crate) fn project(&self, u: Coordinate, v: Coordinate) -> Coordinate {
        // zero length segments project onto their single point
        if u == v {
            return u;
        }

        let bx = v.lon - u.lon;
        let by = v.lat - u.lat;
        let bx2 = bx * self.lon_scale;
        let sq = bx2 * bx2 + by * by;
        // only the numerator is needed until the projection is known to fall
        // between the endpoints
        let scale = (self.lon - u.lon) * self.lon_scale * bx2 + (self.lat - u.lat) * by;

        if scale <= 0.0 {
            u
        } else if scale >= sq {
            v
        } else {
            let t = scale / sq;
            Coordinate::new(u.lon + bx * t, u.lat + by * t)
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;
    use crate::graph::memory::MemoryGraphBuilder;

    fn projector_at(lon: f64, lat: f64) -> Projector {
        let graph = MemoryGraphBuilder::new().build().unwrap();
        Projector::new(Location::new(lon, lat), &graph, &SearchConfig::default())
    }

    #[test]
    fn project_falls_between_endpoints_001() {
        let projector = projector_at(0.0005, 0.0001);
        let u = Coordinate::new(0.0, 0.0);
        let v = Coordinate::new(0.001, 0.0);

        let point = projector.project(u, v);
        assert_relative_eq!(point.lon, 0.0005, epsilon = 1e-9);
        assert_relative_eq!(point.lat, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn project_clamps_to_endpoints_001() {
        let u = Coordinate::new(0.0, 0.0);
        let v = Coordinate::new(0.001, 0.0);

        let before = projector_at(-0.5, 0.0001);
        assert_eq!(before.project(u, v), u);

        let after = projector_at(0.5, 0.0001);
        assert_eq!(after.project(u, v), v);
    }

    #[test]
    fn project_handles_zero_length_segments_001() {
        let projector = projector_at(0.0005, 0.0001);
        let u = Coordinate::new(0.0002, 0.0002);
        assert_eq!(projector.project(u, u), u);
    }

    #[test]
    fn projector_without_tiles_finishes_immediately_001() {
        let projector = projector_at(10.0, 10.0);
        assert!(!projector.has_bin());
    }

    fn road_candidate(point: Coordinate, index: usize) -> (crate::MemoryGraph, Candidate) {
        let mut builder = MemoryGraphBuilder::new();
        builder.way(&[(0.0, 0.0), (0.001, 0.0)]);
        let graph = builder.build().unwrap();

        let edge_id = graph.way(0).0;
        let tile = graph.tile_containing(edge_id).unwrap();
        let edge = *tile.directed_edge(edge_id).unwrap();
        let candidate = Candidate {
            sq_distance: 0.0,
            point,
            index,
            edge_id,
            edge,
            tile,
        };
        (graph, candidate)
    }

    #[test]
    fn side_of_street_follows_the_half_plane_001() {
        let config = SearchConfig::default();
        let (_graph, candidate) = road_candidate(Coordinate::new(0.0004, 0.0), 0);

        let north = Coordinate::new(0.0004, 0.0001);
        assert_eq!(candidate.side_of_street(north, 11.0, &config), SideOfStreet::Left);

        let south = Coordinate::new(0.0004, -0.0001);
        assert_eq!(candidate.side_of_street(south, 11.0, &config), SideOfStreet::Right);
    }

    #[test]
    fn side_of_street_snaps_to_none_when_close_001() {
        let config = SearchConfig::default();
        let (_graph, candidate) = road_candidate(Coordinate::new(0.0004, 0.0), 0);

        // basically on the street
        let original = Coordinate::new(0.0004, 0.00003);
        assert_eq!(candidate.side_of_street(original, 3.3, &config), SideOfStreet::None);
    }

    #[test]
    fn side_of_street_is_none_near_shape_ends_001() {
        let config = SearchConfig::default();
        // projected point ~2 m from the start of the shape
        let (_graph, candidate) = road_candidate(Coordinate::new(0.00002, 0.0), 0);

        let original = Coordinate::new(0.00002, 0.0001);
        assert_eq!(candidate.side_of_street(original, 11.0, &config), SideOfStreet::None);
    }
}
