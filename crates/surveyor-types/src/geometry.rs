use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A WGS84 position. Serialized as `[lon, lat]` or `[lon, lat, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
    pub height: Option<f64>,
}

impl Coordinate {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            height: None,
        }
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = Some(height);
        self
    }

    /// Horizontal equality, ignoring height.
    pub fn same_position(&self, other: &Coordinate) -> bool {
        self.longitude == other.longitude && self.latitude == other.latitude
    }
}

impl TryFrom<Vec<f64>> for Coordinate {
    type Error = String;

    fn try_from(raw: Vec<f64>) -> Result<Self, Self::Error> {
        match raw.as_slice() {
            [lon, lat] => Ok(Coordinate::new(*lon, *lat)),
            [lon, lat, h] => Ok(Coordinate::new(*lon, *lat).with_height(*h)),
            other => Err(format!(
                "coordinate must have 2 or 3 components, got {}",
                other.len()
            )),
        }
    }
}

impl From<Coordinate> for Vec<f64> {
    fn from(value: Coordinate) -> Self {
        match value.height {
            Some(h) => vec![value.longitude, value.latitude, h],
            None => vec![value.longitude, value.latitude],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub free_point: bool,
}

impl Waypoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            height: None,
            free_point: false,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            longitude: self.longitude,
            latitude: self.latitude,
            height: self.height,
        }
    }

    /// Moves the waypoint onto `coord`, keeping the current height when the
    /// coordinate does not carry one.
    pub fn moved_to(&self, coord: Coordinate) -> Self {
        Self {
            longitude: coord.longitude,
            latitude: coord.latitude,
            height: coord.height.or(self.height),
            free_point: self.free_point,
        }
    }
}

impl From<Coordinate> for Waypoint {
    fn from(value: Coordinate) -> Self {
        Self {
            longitude: value.longitude,
            latitude: value.latitude,
            height: value.height,
            free_point: false,
        }
    }
}

/// A server-resolved routable segment between two consecutive waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathArc {
    pub length: f64,
    pub coordinates: Vec<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_limit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Path {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arcs: Option<Vec<PathArc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_interval_m: Option<f64>,
}

impl Path {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: Some(name.into()),
            waypoints: Vec::new(),
            arcs: None,
            capture_interval_m: None,
        }
    }

    /// Replaces the waypoint sequence. Any resolved arcs are dropped because
    /// they no longer describe the sequence.
    pub fn set_waypoints(&mut self, waypoints: Vec<Waypoint>) {
        self.waypoints = waypoints;
        self.arcs = None;
    }

    /// Commits a waypoint sequence together with the arcs resolved for it.
    pub fn commit_resolved(&mut self, waypoints: Vec<Waypoint>, arcs: Vec<PathArc>) {
        let routable = waypoints.len() >= 2;
        self.waypoints = waypoints;
        self.arcs = if routable { Some(arcs) } else { None };
    }

    /// Rendered geometry: the arc coordinates when resolved, else the raw waypoints.
    pub fn rendered_points(&self) -> Vec<Coordinate> {
        match &self.arcs {
            Some(arcs) if !arcs.is_empty() => arcs
                .iter()
                .flat_map(|arc| arc.coordinates.iter().copied())
                .collect(),
            _ => self.waypoints.iter().map(Waypoint::coordinate).collect(),
        }
    }

    pub fn total_length(&self) -> f64 {
        self.arcs
            .as_ref()
            .map(|arcs| arcs.iter().map(|a| a.length).sum())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Polygon {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Boundary vertices, in order. The ring closes implicitly.
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub paths: Vec<Path>,
}

impl Polygon {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: Some(name.into()),
            waypoints: Vec::new(),
            paths: Vec::new(),
        }
    }

    /// Closed boundary ring: first vertex repeated at the end.
    pub fn ring(&self) -> Vec<Coordinate> {
        let mut ring: Vec<Coordinate> = self.waypoints.iter().map(Waypoint::coordinate).collect();
        if let Some(first) = ring.first().copied() {
            ring.push(first);
        }
        ring
    }
}

/// A plan element. `Polygon` is the structural discriminator: polygons never
/// need routable arcs for their own vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Path(Path),
    Polygon(Polygon),
}

impl Shape {
    pub fn id(&self) -> &str {
        match self {
            Shape::Path(p) => &p.id,
            Shape::Polygon(p) => &p.id,
        }
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self, Shape::Polygon(_))
    }
}
