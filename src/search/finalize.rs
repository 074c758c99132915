use rustc_hash::FxHashMap;
use tracing::debug;

use crate::geometry;
use crate::graph::{DirectedEdge, EdgeInfo, GraphReader, NodeInfo};
use crate::model::{Coordinate, Correlation, GraphId, Location, PathEdge, SideOfStreet, StopType};
use crate::search::handler::BinHandler;
use crate::search::projector::Candidate;

impl<'a, R, EF, NF> BinHandler<'a, R, EF, NF>
where
    R: GraphReader,
    EF: Fn(&DirectedEdge) -> f64,
    NF: Fn(&NodeInfo) -> bool,
{
    /// Turns every projector's candidates into correlations. Reachable
    /// candidates come first, island candidates serve as fallback after
    /// them. Locations that correlate to nothing are left out of the map.
    pub(crate) fn finalize(&mut self) -> FxHashMap<Location, Correlation> {
        if self.aborted {
            debug!("search interrupted, dropping all results");
            return FxHashMap::default();
        }

        let mut searched = FxHashMap::default();
        let projectors = std::mem::take(&mut self.projectors);

        for mut projector in projectors {
            let mut candidates = std::mem::take(&mut projector.reachable);
            candidates.append(&mut projector.unreachable);

            let location = projector.location;
            let mut correlated = Correlation::default();

            for candidate in &candidates {
                let shape = candidate.edge_info().shape();
                let first = shape[0];
                let last = shape[shape.len() - 1];

                // the projection may be at a node, either because it is the
                // closest thing or through the snap tolerance
                let front = candidate.point == first
                    || geometry::distance(location.point, first) < self.config.node_snap;
                let back = candidate.point == last
                    || geometry::distance(location.point, last) < self.config.node_snap;
                let forward = candidate.edge.forward;

                if (front && forward) || (back && !forward) {
                    // begin node, resolved through the twin's end node; with
                    // no twin tile to follow the candidate is dropped
                    let Some((opposing_id, opposing_tile)) =
                        self.reader.opposing_edge_id(candidate.edge_id)
                    else {
                        continue;
                    };
                    let Some(opposing) = opposing_tile.directed_edge(opposing_id) else {
                        continue;
                    };
                    self.correlate_node(&location, opposing.end_node, candidate, &mut correlated);
                } else if (back && forward) || (front && !forward) {
                    self.correlate_node(&location, candidate.edge.end_node, candidate, &mut correlated);
                } else {
                    self.correlate_edge(&location, candidate, &mut correlated);
                }
            }

            if correlated.edges.is_empty() {
                debug!("no suitable edges near {:?}", location.point);
            } else {
                debug!(
                    "correlated {:?} to {} path edges",
                    location.point,
                    correlated.edges.len()
                );
                searched.insert(location, correlated);
            }
        }

        searched
    }

    /// Emits one path edge per usable directed edge touching the node, plus
    /// the entering twin of each with the complementary position.
    fn correlate_node(
        &self,
        location: &Location,
        node_id: GraphId,
        candidate: &Candidate,
        correlated: &mut Correlation,
    ) {
        let distance = geometry::distance(location.point, candidate.point);
        let mut reserve = Vec::new();
        self.crawl(
            location,
            node_id,
            true,
            candidate.point,
            distance,
            &mut correlated.edges,
            &mut reserve,
        );

        // a through stop with a heading wants to leave the node at that
        // heading, so only the outbound edges stay
        if location.stop_type == StopType::Through && location.heading.is_some() {
            correlated.edges.retain(|edge| !edge.at_end_node());
        }
    }

    /// Walks the node's edge range, following transition edges one level
    /// deep. Path edges failing the heading filter land in the reserve and
    /// are promoted when nothing else survived.
    fn crawl(
        &self,
        location: &Location,
        node_id: GraphId,
        follow_transitions: bool,
        snapped: Coordinate,
        distance: f64,
        edges: &mut Vec<PathEdge>,
        reserve: &mut Vec<PathEdge>,
    ) {
        let Some(tile) = self.reader.tile_containing(node_id) else {
            return;
        };
        let Some(node) = tile.node(node_id).copied() else {
            return;
        };

        for i in 0..node.edge_count {
            let index = node.edge_index as u64 + u64::from(i);
            let Some(edge) = tile.directed_edge_at(index).copied() else {
                break;
            };

            // transition edges lead to the same place on another level
            if follow_transitions && edge.transition {
                self.crawl(location, edge.end_node, false, snapped, distance, edges, reserve);
                continue;
            }

            let id = tile.id().with_index(index);
            let info = tile.edge_info(&edge);

            if (self.edge_filter)(&edge) != 0.0 {
                let path_edge = PathEdge {
                    edge: id,
                    dist_along: 0.0,
                    point: node.point,
                    distance,
                    side: SideOfStreet::None,
                    reach: self.get_reach(&edge),
                };
                let tangent_index = if edge.forward { 0 } else { info.shape().len() - 2 };
                if self.heading_filter(&edge, info, location, snapped, distance, tangent_index) {
                    reserve.push(path_edge);
                } else {
                    edges.push(path_edge);
                }
            }

            // the twin enters this node from the far end
            let Some((opposing_id, opposing_tile)) = self.reader.opposing_edge_id(id) else {
                continue;
            };
            let Some(opposing) = opposing_tile.directed_edge(opposing_id).copied() else {
                continue;
            };
            if (self.edge_filter)(&opposing) != 0.0 {
                let path_edge = PathEdge {
                    edge: opposing_id,
                    dist_along: 1.0,
                    point: node.point,
                    distance,
                    side: SideOfStreet::None,
                    reach: self.get_reach(&edge),
                };
                let tangent_index = if opposing.forward { 0 } else { info.shape().len() - 2 };
                if self.heading_filter(&opposing, info, location, snapped, distance, tangent_index) {
                    reserve.push(path_edge);
                } else {
                    edges.push(path_edge);
                }
            }
        }

        // nothing survived the heading: better to ignore it than to fail
        if edges.is_empty() && !reserve.is_empty() {
            edges.append(reserve);
        }
    }

    /// Emits the candidate's position along its edge and the complementary
    /// position on the twin.
    fn correlate_edge(&self, location: &Location, candidate: &Candidate, correlated: &mut Correlation) {
        let distance = geometry::distance(location.point, candidate.point);
        let info = candidate.edge_info();
        let shape = info.shape();

        // ratio measured in the direction the shape is stored in, flipped
        // for the reverse twin
        let mut partial_length = 0.0;
        for i in 0..candidate.index {
            partial_length += geometry::distance(shape[i], shape[i + 1]);
        }
        partial_length += geometry::distance(shape[candidate.index], candidate.point);
        partial_length = partial_length.min(candidate.edge.length);

        let mut dist_along = partial_length / candidate.edge.length;
        if !candidate.edge.forward {
            dist_along = 1.0 - dist_along;
        }

        let side = candidate.side_of_street(location.point, distance, &self.config);

        let mut reserve = Vec::new();
        let path_edge = PathEdge {
            edge: candidate.edge_id,
            dist_along,
            point: candidate.point,
            distance,
            side,
            reach: self.get_reach(&candidate.edge),
        };
        if self.heading_filter(&candidate.edge, info, location, candidate.point, distance, candidate.index)
        {
            reserve.push(path_edge);
        } else {
            correlated.edges.push(path_edge);
        }

        // the twin is an independent result with the complementary ratio
        // and the flipped side
        if let Some((opposing_id, opposing_tile)) = self.reader.opposing_edge_id(candidate.edge_id)
            && let Some(opposing) = opposing_tile.directed_edge(opposing_id).copied()
            && (self.edge_filter)(&opposing) != 0.0
        {
            let path_edge = PathEdge {
                edge: opposing_id,
                dist_along: 1.0 - dist_along,
                point: candidate.point,
                distance,
                side: side.flip(),
                reach: self.get_reach(&opposing),
            };
            if self.heading_filter(&opposing, info, location, candidate.point, distance, candidate.index)
            {
                reserve.push(path_edge);
            } else {
                correlated.edges.push(path_edge);
            }
        }

        if correlated.edges.is_empty() && !reserve.is_empty() {
            correlated.edges.append(&mut reserve);
        }
    }

    /// True when the path edge should be set aside: the input carries a
    /// heading, the snap is close enough for it to mean anything, and the
    /// road's tangent disagrees beyond the tolerance.
    fn heading_filter(
        &self,
        edge: &DirectedEdge,
        info: &EdgeInfo,
        location: &Location,
        point: Coordinate,
        distance: f64,
        index: usize,
    ) -> bool {
        let Some(heading) = location.heading else {
            return false;
        };
        if distance > self.config.no_heading {
            return false;
        }

        let angle = tangent_angle(index, point, info.shape(), edge.forward, self.config.heading_sample);
        let tolerance = location.heading_tolerance.unwrap_or(self.config.default_angle_width);
        geometry::angle_difference(heading, angle) > tolerance
    }
}

/// Estimates the tangent of the polyline at a point on segment `index` by
/// sampling roughly `sample` meters of shape around it, preferring the side
/// the travel direction comes from and borrowing from the other side when
/// the polyline runs out. On reverse edges the incoming direction runs along
/// increasing shape indices.
pub(crate) fn tangent_angle(
    index: usize,
    point: Coordinate,
    shape: &[Coordinate],
    forward: bool,
    sample: f64,
) -> f64 {
    let mut remaining = sample;

    // move against the travel direction until enough shape is behind us
    let mut u = point;
    if forward {
        let mut i = index as isize;
        while remaining > 0.0 && i >= 0 {
            let next = shape[i as usize];
            let d = geometry::distance(u, next);
            if remaining <= d {
                u = geometry::interpolate(u, next, remaining / d);
                return geometry::heading(u, point);
            }
            u = next;
            remaining -= d;
            i -= 1;
        }
    } else {
        let mut i = index + 1;
        while remaining > 0.0 && i < shape.len() {
            let next = shape[i];
            let d = geometry::distance(u, next);
            if remaining <= d {
                u = geometry::interpolate(u, next, remaining / d);
                return geometry::heading(u, point);
            }
            u = next;
            remaining -= d;
            i += 1;
        }
    }

    // not enough behind: keep sampling with the travel direction
    let mut v = point;
    if forward {
        let mut i = index + 1;
        while remaining > 0.0 && i < shape.len() {
            let next = shape[i];
            let d = geometry::distance(v, next);
            if remaining <= d {
                v = geometry::interpolate(v, next, remaining / d);
                return geometry::heading(u, v);
            }
            v = next;
            remaining -= d;
            i += 1;
        }
    } else {
        let mut i = index as isize;
        while remaining > 0.0 && i >= 0 {
            let next = shape[i as usize];
            let d = geometry::distance(v, next);
            if remaining <= d {
                v = geometry::interpolate(v, next, remaining / d);
                return geometry::heading(u, v);
            }
            v = next;
            remaining -= d;
            i -= 1;
        }
    }

    geometry::heading(u, v)
}
