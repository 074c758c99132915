//! Correlation of input locations to the road network.
//!
//! 1. Every unique input becomes a projector holding its own best-first bin
//!    enumeration and candidate lists.
//! 2. Projectors are kept sorted so the ones currently looking at the same
//!    bin are handled together, amortizing tile reads across the batch.
//! 3. Each bin's edges are projected against every projector in the group;
//!    the best point per edge is admitted into the projector's reachable or
//!    unreachable list depending on an island-size probe.
//! 4. A projector finishes when no remaining bin can beat its best candidate
//!    or the search cutoff is exceeded.
//! 5. The surviving candidates are turned into node or edge correlations,
//!    subject to heading and side-of-street rules.

mod finalize;
mod handler;
mod projector;
mod reach;

use rustc_hash::FxHashMap;
use tracing::info;

use crate::graph::{DirectedEdge, GraphReader, NodeInfo};
use crate::model::{Correlation, Location};
use handler::BinHandler;

/// Distance thresholds of the correlation search, all meters except the
/// angle width. The defaults are the values the algorithms were tuned with;
/// changing them changes snapping behavior, not correctness.
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// Inputs farther than this from any graph geometry get no result.
    pub search_cutoff: f64,
    /// Projections closer than this to an edge's end are treated as the node.
    pub node_snap: f64,
    /// Inputs closer than this to the centerline are on neither side.
    pub side_of_street_snap: f64,
    /// Beyond this snap distance an input heading is ignored.
    pub no_heading: f64,
    /// How many meters of shape the tangent angle is estimated over.
    pub heading_sample: f64,
    /// Heading tolerance applied when the input doesn't carry its own.
    pub default_angle_width: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_cutoff: 35_000.0,
            node_snap: 5.0,
            side_of_street_snap: 5.0,
            no_heading: 30.0,
            heading_sample: 30.0,
            default_angle_width: 60.0,
        }
    }
}

/// Correlates each input location to the directed edges it best corresponds
/// to. Locations that correlate to nothing are absent from the returned map;
/// duplicates are searched once. An empty input yields an empty map.
///
/// The edge filter returns a positive weight for edges usable as snap
/// targets and 0.0 for the rest; the node filter returns true for nodes the
/// reachability probe must not traverse. Both must be cheap and pure.
pub fn search<R, EF, NF>(
    config: &SearchConfig,
    reader: &R,
    locations: &[Location],
    edge_filter: EF,
    node_filter: NF,
) -> FxHashMap<Location, Correlation>
where
    R: GraphReader,
    EF: Fn(&DirectedEdge) -> f64,
    NF: Fn(&NodeInfo) -> bool,
{
    run(config, reader, locations, edge_filter, node_filter, None)
}

/// Same as [`search`], with a cancellation hook. The hook is polled between
/// bin rounds and before reachability probes; once it returns true the call
/// gives up and returns an empty map.
pub fn search_with_interrupt<R, EF, NF>(
    config: &SearchConfig,
    reader: &R,
    locations: &[Location],
    edge_filter: EF,
    node_filter: NF,
    interrupt: &dyn Fn() -> bool,
) -> FxHashMap<Location, Correlation>
where
    R: GraphReader,
    EF: Fn(&DirectedEdge) -> f64,
    NF: Fn(&NodeInfo) -> bool,
{
    run(config, reader, locations, edge_filter, node_filter, Some(interrupt))
}

fn run<R, EF, NF>(
    config: &SearchConfig,
    reader: &R,
    locations: &[Location],
    edge_filter: EF,
    node_filter: NF,
    interrupt: Option<&dyn Fn() -> bool>,
) -> FxHashMap<Location, Correlation>
where
    R: GraphReader,
    EF: Fn(&DirectedEdge) -> f64,
    NF: Fn(&NodeInfo) -> bool,
{
    if locations.is_empty() {
        return FxHashMap::default();
    }

    info!("correlating {} locations", locations.len());
    let mut handler = BinHandler::new(config, reader, locations, edge_filter, node_filter, interrupt);
    handler.search();
    handler.finalize()
}
