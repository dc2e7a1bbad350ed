//! Planar helpers over WGS84 coordinates.

use surveyor_types::{Coordinate, Path};

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in metres.
pub fn distance_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

pub fn polyline_length_m(points: &[Coordinate]) -> f64 {
    points.windows(2).map(|w| distance_m(&w[0], &w[1])).sum()
}

pub fn nearest_index(points: &[Coordinate], target: &Coordinate) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| distance_m(a, target).total_cmp(&distance_m(b, target)))
        .map(|(i, _)| i)
}

/// The rendered point of `path` closest to `coord`.
pub fn snap_to_path(path: &Path, coord: &Coordinate) -> Option<Coordinate> {
    let points = path.rendered_points();
    nearest_index(&points, coord).map(|i| points[i])
}

/// Where a point dropped near `path` belongs in its waypoint sequence.
///
/// The nearest rendered point is found first. With resolved arcs, arc `k`
/// runs from waypoint `k` to `k + 1`, so the point goes between them. Without
/// arcs the nearest waypoint is paired with whichever neighbour is closer.
/// The result never extends the path at either end.
pub fn insertion_index(path: &Path, coord: &Coordinate) -> usize {
    let n = path.waypoints.len();
    if n < 2 {
        return n;
    }

    if let Some(arcs) = path.arcs.as_ref().filter(|arcs| !arcs.is_empty()) {
        let nearest_arc = arcs
            .iter()
            .enumerate()
            .flat_map(|(k, arc)| arc.coordinates.iter().map(move |c| (k, c)))
            .min_by(|(_, a), (_, b)| distance_m(a, coord).total_cmp(&distance_m(b, coord)))
            .map(|(k, _)| k);
        if let Some(k) = nearest_arc {
            return (k + 1).min(n - 1);
        }
    }

    let points: Vec<Coordinate> = path.waypoints.iter().map(|w| w.coordinate()).collect();
    let Some(j) = nearest_index(&points, coord) else {
        return n;
    };
    if j == 0 {
        1
    } else if j == n - 1 {
        n - 1
    } else if distance_m(&points[j - 1], coord) <= distance_m(&points[j + 1], coord) {
        j
    } else {
        j + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surveyor_types::{PathArc, Waypoint};

    fn straight_path(lons: &[f64]) -> Path {
        let mut path = Path::new("line");
        path.set_waypoints(lons.iter().map(|lon| Waypoint::new(*lon, 0.0)).collect());
        path
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let d = distance_m(&Coordinate::new(0.0, 0.0), &Coordinate::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 10.0, "{d}");
    }

    #[test]
    fn insertion_between_nearest_waypoints() {
        let path = straight_path(&[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(insertion_index(&path, &Coordinate::new(1.4, 0.1)), 2);
        assert_eq!(insertion_index(&path, &Coordinate::new(0.6, 0.1)), 1);
        assert_eq!(insertion_index(&path, &Coordinate::new(-5.0, 0.0)), 1);
        assert_eq!(insertion_index(&path, &Coordinate::new(9.0, 0.0)), 3);
    }

    #[test]
    fn insertion_uses_arc_geometry_when_resolved() {
        let mut path = straight_path(&[0.0, 2.0, 4.0]);
        // The first arc detours north, so a point at (1, 1) sits on it.
        let arcs = vec![
            PathArc {
                length: 3.0,
                coordinates: vec![
                    Coordinate::new(0.0, 0.0),
                    Coordinate::new(1.0, 1.0),
                    Coordinate::new(2.0, 0.0),
                ],
                completed: None,
                speed_limit: None,
            },
            PathArc {
                length: 2.0,
                coordinates: vec![Coordinate::new(2.0, 0.0), Coordinate::new(4.0, 0.0)],
                completed: None,
                speed_limit: None,
            },
        ];
        let waypoints = path.waypoints.clone();
        path.commit_resolved(waypoints, arcs);
        assert_eq!(insertion_index(&path, &Coordinate::new(1.0, 0.9)), 1);
        assert_eq!(insertion_index(&path, &Coordinate::new(3.5, 0.0)), 2);
    }

    #[test]
    fn short_paths_append() {
        assert_eq!(insertion_index(&straight_path(&[]), &Coordinate::new(0.0, 0.0)), 0);
        assert_eq!(insertion_index(&straight_path(&[1.0]), &Coordinate::new(0.0, 0.0)), 1);
    }
}
