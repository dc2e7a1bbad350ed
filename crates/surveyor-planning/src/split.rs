use surveyor_types::{Coordinate, Path, PathArc, Waypoint};
use uuid::Uuid;

use crate::geometry::polyline_length_m;

/// Splits `path` at a coordinate lying on one of its resolved arcs.
///
/// The arc holding `at` is cut there and the seam coordinate appears in both
/// halves. Both results keep every other field of `path` but get fresh ids.
/// When `at` is where two arcs meet, the path is cut between them and no arc
/// is divided. Returns `None` when `path` has no arcs, `at` is not on any of
/// them, or `at` is one of the path's two ends.
pub fn split_path(path: &Path, at: &Coordinate) -> Option<(Path, Path)> {
    let arcs = path.arcs.as_ref()?;
    let (arc_index, coord_index) = arcs.iter().enumerate().find_map(|(k, arc)| {
        arc.coordinates
            .iter()
            .position(|c| c.same_position(at))
            .map(|j| (k, j))
    })?;

    let arc = &arcs[arc_index];
    if coord_index + 1 == arc.coordinates.len() {
        return split_between_arcs(path, arcs, arc_index + 1);
    }
    if coord_index == 0 {
        return split_between_arcs(path, arcs, arc_index);
    }

    let head_coords = arc.coordinates[..=coord_index].to_vec();
    let tail_coords = arc.coordinates[coord_index..].to_vec();
    let (head_len, tail_len) = apportion(arc.length, &head_coords, &tail_coords);
    let seam = arc.coordinates[coord_index];

    let mut head_arcs = arcs[..arc_index].to_vec();
    head_arcs.push(PathArc {
        length: head_len,
        coordinates: head_coords,
        ..arc.clone()
    });
    let mut tail_arcs = vec![PathArc {
        length: tail_len,
        coordinates: tail_coords,
        ..arc.clone()
    }];
    tail_arcs.extend_from_slice(&arcs[arc_index + 1..]);

    // Arc k joins waypoints k and k + 1; the seam becomes a waypoint of both.
    let split_at = (arc_index + 1).min(path.waypoints.len());
    let seam_waypoint = Waypoint::from(seam);
    let mut head_waypoints = path.waypoints[..split_at].to_vec();
    head_waypoints.push(seam_waypoint);
    let mut tail_waypoints = vec![seam_waypoint];
    tail_waypoints.extend_from_slice(&path.waypoints[split_at..]);

    let head = Path {
        id: Uuid::new_v4().to_string(),
        waypoints: head_waypoints,
        arcs: Some(head_arcs),
        ..path.clone()
    };
    let tail = Path {
        id: Uuid::new_v4().to_string(),
        waypoints: tail_waypoints,
        arcs: Some(tail_arcs),
        ..path.clone()
    };
    Some((head, tail))
}

/// Cuts before `arcs[boundary]`; waypoint `boundary` ends the head and
/// starts the tail.
fn split_between_arcs(path: &Path, arcs: &[PathArc], boundary: usize) -> Option<(Path, Path)> {
    if boundary == 0 || boundary >= arcs.len() {
        return None;
    }
    let n = path.waypoints.len();
    let head = Path {
        id: Uuid::new_v4().to_string(),
        waypoints: path.waypoints[..(boundary + 1).min(n)].to_vec(),
        arcs: Some(arcs[..boundary].to_vec()),
        ..path.clone()
    };
    let tail = Path {
        id: Uuid::new_v4().to_string(),
        waypoints: path.waypoints[boundary.min(n)..].to_vec(),
        arcs: Some(arcs[boundary..].to_vec()),
        ..path.clone()
    };
    Some((head, tail))
}

/// Shares `total` between the two parts in proportion to their geometry.
fn apportion(total: f64, head: &[Coordinate], tail: &[Coordinate]) -> (f64, f64) {
    let (h, t) = (polyline_length_m(head), polyline_length_m(tail));
    if h + t <= f64::EPSILON {
        return (0.0, total);
    }
    let head_len = total * h / (h + t);
    (head_len, total - head_len)
}
