use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use crate::geometry::METERS_PER_DEGREE;
use crate::model::{Coordinate, GraphId};

/// Hierarchy level the correlation search runs on.
pub const CORRELATION_LEVEL: u8 = 2;

/// Spatial bins per tile.
pub const BIN_COUNT: usize = 25;

/// The world grid of graph tiles: [-180, 180] x [-90, 90] split into square
/// tiles, each tile subdivided into a fixed raster of spatial bins. Tiles are
/// indexed row-major from the south-west corner; so are the bins of a tile.
///
/// The tiling is purely geometric, it never reads tile contents.
#[derive(Debug, Clone, Copy)]
pub struct Tiling {
    tile_size: f64,
    bin_dim: i64,
}

impl Default for Tiling {
    fn default() -> Self {
        Self {
            tile_size: 0.25,
            bin_dim: 5,
        }
    }
}

impl Tiling {
    fn bin_size(&self) -> f64 {
        self.tile_size / self.bin_dim as f64
    }

    fn bin_cols(&self) -> i64 {
        (360.0 / self.bin_size()).round() as i64
    }

    fn bin_rows(&self) -> i64 {
        (180.0 / self.bin_size()).round() as i64
    }

    fn tile_cols(&self) -> i64 {
        (360.0 / self.tile_size).round() as i64
    }

    /// Global bin lattice cell containing the point, clamped to the grid.
    fn bin_cell(&self, p: Coordinate) -> (i64, i64) {
        let col = ((p.lon + 180.0) / self.bin_size()).floor() as i64;
        let row = ((p.lat + 90.0) / self.bin_size()).floor() as i64;
        (col.clamp(0, self.bin_cols() - 1), row.clamp(0, self.bin_rows() - 1))
    }

    fn cell_id(&self, col: i64, row: i64) -> (GraphId, u8) {
        let tile = (row / self.bin_dim) * self.tile_cols() + (col / self.bin_dim);
        let bin = ((row % self.bin_dim) * self.bin_dim + (col % self.bin_dim)) as u8;
        (GraphId::new(CORRELATION_LEVEL, tile as u32, 0), bin)
    }

    /// Id of the tile containing the point.
    pub fn tile_of(&self, p: Coordinate) -> GraphId {
        self.bin_of(p).0
    }

    /// Tile id and in-tile bin index of the bin containing the point.
    pub fn bin_of(&self, p: Coordinate) -> (GraphId, u8) {
        let (col, row) = self.bin_cell(p);
        self.cell_id(col, row)
    }

    /// Step between shape sample points that guarantees no bin is skipped.
    pub(crate) fn bin_sample_step(&self) -> f64 {
        self.bin_size() / 4.0
    }

    /// Minimum possible planar distance in meters from the origin to any
    /// geometry inside the cell. Columns may lie outside the grid when the
    /// expansion has wrapped past the antimeridian; the unwrapped rectangle
    /// keeps the measure continuous there.
    fn cell_distance(&self, origin: Coordinate, meters_per_lon_degree: f64, col: i64, row: i64) -> f64 {
        let bin_size = self.bin_size();
        let min_lon = col as f64 * bin_size - 180.0;
        let min_lat = row as f64 * bin_size - 90.0;
        let dlon = (min_lon - origin.lon).max(origin.lon - (min_lon + bin_size)).max(0.0);
        let dlat = (min_lat - origin.lat).max(origin.lat - (min_lat + bin_size)).max(0.0);
        let dx = dlon * meters_per_lon_degree;
        let dy = dlat * METERS_PER_DEGREE;
        (dx * dx + dy * dy).sqrt()
    }

    /// Lazy best-first enumeration of bins by their minimum possible distance
    /// to the origin. The yielded distances are non-decreasing, which is what
    /// allows a consumer to stop as soon as the lower bound exceeds its best
    /// known result.
    pub fn closest_bins(&self, origin: Coordinate) -> ClosestBins {
        let meters_per_lon_degree = origin.lat.to_radians().cos() * METERS_PER_DEGREE;
        let (col, row) = self.bin_cell(origin);

        let mut bins = ClosestBins {
            tiling: *self,
            origin,
            meters_per_lon_degree,
            heap: BinaryHeap::new(),
            visited: FxHashSet::default(),
        };
        bins.push(col, row);
        bins
    }
}

#[derive(Debug, Clone, Copy)]
struct BinElement {
    distance: f64,
    col: i64,
    row: i64,
}

// The priority queue depends on the implementation of the Ord trait.
// By default std::BinaryHeap is a max heap.
// Explicitly implement the trait so the queue becomes a min heap.
impl Ord for BinElement {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            // breaking ties in a deterministic way
            .then_with(|| other.row.cmp(&self.row))
            .then_with(|| other.col.cmp(&self.col))
    }
}

impl PartialOrd for BinElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BinElement {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BinElement {}

/// Iterator over (tile id, bin index, lower bound distance) tuples in
/// non-decreasing distance order, expanding outwards from the origin bin
/// until the whole grid is exhausted.
#[derive(Debug)]
pub struct ClosestBins {
    tiling: Tiling,
    origin: Coordinate,
    meters_per_lon_degree: f64,
    heap: BinaryHeap<BinElement>,
    visited: FxHashSet<(i64, i64)>,
}

impl ClosestBins {
    fn push(&mut self, col: i64, row: i64) {
        if row < 0 || row >= self.tiling.bin_rows() {
            return;
        }
        let key = (col.rem_euclid(self.tiling.bin_cols()), row);
        if !self.visited.insert(key) {
            return;
        }
        let distance = self
            .tiling
            .cell_distance(self.origin, self.meters_per_lon_degree, col, row);
        self.heap.push(BinElement { distance, col, row });
    }
}

impl Iterator for ClosestBins {
    type Item = (GraphId, u8, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let BinElement { distance, col, row } = self.heap.pop()?;

        for dc in -1..=1 {
            for dr in -1..=1 {
                if dc != 0 || dr != 0 {
                    self.push(col + dc, row + dr);
                }
            }
        }

        let wrapped = col.rem_euclid(self.tiling.bin_cols());
        let (tile, bin) = self.tiling.cell_id(wrapped, row);
        Some((tile, bin, distance))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn origin_bin_comes_first_at_distance_zero_001() {
        let tiling = Tiling::default();
        let origin = Coordinate::new(13.46112, 52.51711);

        let (tile, bin, distance) = tiling.closest_bins(origin).next().unwrap();
        assert_eq!((tile, bin), tiling.bin_of(origin));
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn distances_are_non_decreasing_001() {
        let tiling = Tiling::default();
        let origin = Coordinate::new(0.0005, 0.0001);

        let mut previous = 0.0;
        for (_, _, distance) in tiling.closest_bins(origin).take(500) {
            assert!(distance >= previous, "{distance} < {previous}");
            previous = distance;
        }
    }

    #[test]
    fn bins_are_yielded_once_001() {
        let tiling = Tiling::default();
        let origin = Coordinate::new(-0.1, 51.5);

        let mut seen = FxHashSet::default();
        for (tile, bin, _) in tiling.closest_bins(origin).take(500) {
            assert!(seen.insert((tile, bin)));
        }
    }

    #[test]
    fn bin_of_splits_tiles_into_a_raster_001() {
        let tiling = Tiling::default();

        // (0, 0) sits at the south-west corner of its tile, first bin
        let (tile, bin) = tiling.bin_of(Coordinate::new(0.0, 0.0));
        assert_eq!(tile.level(), CORRELATION_LEVEL);
        assert_eq!(tile.index(), 0, "tile ids carry a zero in-tile index");
        assert_eq!(bin, 0);

        // one bin east, same tile
        let (east_tile, east_bin) = tiling.bin_of(Coordinate::new(0.06, 0.0));
        assert_eq!(east_tile, tile);
        assert_eq!(east_bin, 1);

        // one bin north, same tile, next bin row
        let (north_tile, north_bin) = tiling.bin_of(Coordinate::new(0.0, 0.06));
        assert_eq!(north_tile, tile);
        assert_eq!(north_bin, 5);

        // a full tile east
        let (next_tile, _) = tiling.bin_of(Coordinate::new(0.26, 0.0));
        assert_ne!(next_tile, tile);
    }

    #[test]
    fn expansion_wraps_across_the_antimeridian_001() {
        let tiling = Tiling::default();
        let origin = Coordinate::new(179.99, 0.0);

        // a thousand bins from the east edge must include bins west of -180
        let crossed = tiling
            .closest_bins(origin)
            .take(1000)
            .any(|(tile, _, _)| {
                let tile_col = tile.tile() as i64 % tiling.tile_cols();
                tile_col < tiling.tile_cols() / 4
            });
        assert!(crossed);
    }
}
