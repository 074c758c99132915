use std::hash::{Hash, Hasher};

use approx::abs_diff_eq;

/// Coordinate pair stands for a pair of WGS84 longitude (lon) and latitude (lat) values.
/// This coordinate pair specifies a geometric point in a digital map.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        const EPSILON: f64 = 1e-7;
        abs_diff_eq!(self.lon, other.lon, epsilon = EPSILON)
            && abs_diff_eq!(self.lat, other.lat, epsilon = EPSILON)
    }
}

const LEVEL_BITS: u64 = 3;
const TILE_BITS: u64 = 22;
const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;
const TILE_MASK: u64 = (1 << TILE_BITS) - 1;
const BASE_MASK: u64 = (1 << (LEVEL_BITS + TILE_BITS)) - 1;

/// Compact identifier of an object within the tiled graph: a hierarchy level,
/// a tile index within that level and an index within the tile. Whether the
/// in-tile index addresses a node or a directed edge depends on the accessor
/// it is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GraphId(u64);

impl GraphId {
    pub const fn new(level: u8, tile: u32, index: u64) -> Self {
        Self((level as u64 & LEVEL_MASK) | ((tile as u64 & TILE_MASK) << LEVEL_BITS) | (index << (LEVEL_BITS + TILE_BITS)))
    }

    pub const fn level(&self) -> u8 {
        (self.0 & LEVEL_MASK) as u8
    }

    pub const fn tile(&self) -> u32 {
        ((self.0 >> LEVEL_BITS) & TILE_MASK) as u32
    }

    pub const fn index(&self) -> u64 {
        self.0 >> (LEVEL_BITS + TILE_BITS)
    }

    /// The id of the tile that owns this id, that is, the same level and tile
    /// with a zero in-tile index.
    pub const fn tile_base(&self) -> Self {
        Self(self.0 & BASE_MASK)
    }

    /// Same tile, different in-tile index.
    pub const fn with_index(&self, index: u64) -> Self {
        Self((self.0 & BASE_MASK) | (index << (LEVEL_BITS + TILE_BITS)))
    }
}

/// How the route should treat the input: a Break terminates a leg at the
/// location, a Through forces the route to pass through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StopType {
    Break = 0,
    Through = 1,
}

impl Default for StopType {
    fn default() -> Self {
        Self::Break
    }
}

/// Which side of the correlated edge the original input lies on, in the
/// travel direction of that edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SideOfStreet {
    None = 0,
    Left = 1,
    Right = 2,
}

impl Default for SideOfStreet {
    fn default() -> Self {
        Self::None
    }
}

impl SideOfStreet {
    pub const fn flip(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::None => Self::None,
        }
    }
}

/// A single geographic input to correlate against the road network.
///
/// Two locations are equal only when every field is bit-for-bit equal; the
/// search deduplicates its inputs and keys its result map by that equality.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub point: Coordinate,
    /// Preferred direction of travel in degrees [0, 360), measured clockwise
    /// from north. None means no preference.
    pub heading: Option<f64>,
    /// Maximum circular deviation from the heading before a candidate is
    /// rejected. None falls back to the configured default width.
    pub heading_tolerance: Option<f64>,
    /// Search radius in meters. Candidates beyond the radius are only kept
    /// while nothing better is known.
    pub radius: f64,
    /// Minimum number of nodes that must be reachable from a candidate
    /// edge's end node. Zero disables the island check.
    pub minimum_reachability: u32,
    pub stop_type: StopType,
}

impl Location {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            point: Coordinate::new(lon, lat),
            heading: None,
            heading_tolerance: None,
            radius: 0.0,
            minimum_reachability: 0,
            stop_type: StopType::default(),
        }
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.point.lon.to_bits() == other.point.lon.to_bits()
            && self.point.lat.to_bits() == other.point.lat.to_bits()
            && self.heading.map(f64::to_bits) == other.heading.map(f64::to_bits)
            && self.heading_tolerance.map(f64::to_bits) == other.heading_tolerance.map(f64::to_bits)
            && self.radius.to_bits() == other.radius.to_bits()
            && self.minimum_reachability == other.minimum_reachability
            && self.stop_type == other.stop_type
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.point.lon.to_bits().hash(state);
        self.point.lat.to_bits().hash(state);
        self.heading.map(f64::to_bits).hash(state);
        self.heading_tolerance.map(f64::to_bits).hash(state);
        self.radius.to_bits().hash(state);
        self.minimum_reachability.hash(state);
        self.stop_type.hash(state);
    }
}

/// One position on one directed edge that an input correlates to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathEdge {
    pub edge: GraphId,
    /// Position along the edge as a ratio in [0, 1], measured in the edge's
    /// forward direction. 0 and 1 denote the edge's end nodes.
    pub dist_along: f64,
    /// The snapped point on the road network.
    pub point: Coordinate,
    /// Straight-line meters from the input to the snapped point.
    pub distance: f64,
    pub side: SideOfStreet,
    /// Island-size estimate for the edge, None when no probe ran for it.
    pub reach: Option<u32>,
}

impl PathEdge {
    /// True when the path edge enters its end node rather than leaving a node
    /// or lying along the edge.
    pub fn at_end_node(&self) -> bool {
        self.dist_along == 1.0
    }
}

/// The full correlation of one input location: every path edge the input may
/// start or end a route on, best candidates first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    pub edges: Vec<PathEdge>,
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn graph_id_packing_001() {
        let id = GraphId::new(2, 519_120, 42);
        assert_eq!(id.level(), 2);
        assert_eq!(id.tile(), 519_120);
        assert_eq!(id.index(), 42);
        assert_eq!(id.tile_base(), GraphId::new(2, 519_120, 0));
        assert_eq!(id.with_index(7), GraphId::new(2, 519_120, 7));
    }

    #[test]
    fn graph_id_tile_base_is_identity_on_bases_001() {
        let base = GraphId::new(1, 77, 0);
        assert_eq!(base.tile_base(), base);
    }

    #[test]
    fn location_equality_is_exact_001() {
        let a = Location::new(13.46112, 52.51711);
        let mut b = a;
        assert_eq!(a, b);

        b.radius = f64::EPSILON;
        assert_ne!(a, b);

        let mut c = a;
        c.heading = Some(0.0);
        assert_ne!(a, c);
    }

    #[test]
    fn coordinate_equality_is_approximate_001() {
        let a = Coordinate::new(13.46112, 52.51711);
        let b = Coordinate::new(13.46112 + 1e-9, 52.51711 - 1e-9);
        assert_eq!(a, b);
        assert_ne!(a, Coordinate::new(13.4612, 52.51711));
    }

    #[test]
    fn side_of_street_flip_001() {
        assert_eq!(SideOfStreet::Left.flip(), SideOfStreet::Right);
        assert_eq!(SideOfStreet::Right.flip(), SideOfStreet::Left);
        assert_eq!(SideOfStreet::None.flip(), SideOfStreet::None);
    }
}
