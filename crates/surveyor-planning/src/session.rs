//! Point-level editing of the selected path or polygon.
//!
//! Edits that change a routable path are resolved by the path service before
//! anything is committed, and are serialized so two resolutions never race
//! for the same shape. Drags keep a ghost copy of the target that follows the
//! pointer locally while a throttled nearest-point lookup snaps it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use surveyor_core::{EventBus, PlanningSettings};
use surveyor_types::{
    ConsoleEvent, Coordinate, Notification, Path, PathArc, Plan, Shape, Waypoint,
};
use tracing::{debug, info, warn};

use crate::command_port::{MapCommand, RemoteCommandPort};
use crate::error::EditError;
use crate::geometry::{insertion_index, snap_to_path};
use crate::service::PathComputation;
use crate::split::split_path;
use crate::throttle::Throttle;

/// A shape, and optionally one of a polygon's internal paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub shape: usize,
    pub path: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragTarget {
    /// An existing waypoint, by index.
    Waypoint(usize),
    /// The line between waypoints; dropping inserts a new point.
    Line,
}

/// Where an inserted point goes, decided against the shape as it stands
/// once the edit holds the serialization lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    At(usize),
    Append,
    /// Between the two waypoints whose segment passes closest to the point.
    OnLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Path,
    PolygonBoundary,
    PolygonPath,
}

#[derive(Debug, Clone)]
struct EditTarget {
    shape_id: String,
    kind: TargetKind,
    path: Path,
}

impl EditTarget {
    fn ghost_id(&self) -> String {
        format!("{}:ghost", self.path.id)
    }
}

struct NearestRequest {
    drag_id: u64,
    seq: u64,
    waypoint: Waypoint,
}

struct Drag {
    id: u64,
    selection: Selection,
    target: DragTarget,
    base: EditTarget,
    ghost: Vec<Waypoint>,
    ghost_index: usize,
    local: Option<Coordinate>,
    move_seq: u64,
    issued_seq: u64,
    resolved: Option<(u64, Coordinate)>,
    throttle: Throttle<NearestRequest>,
}

impl Drag {
    fn project(&mut self, coord: Coordinate) {
        let mut ghost = self.base.path.waypoints.clone();
        let index = match self.target {
            DragTarget::Waypoint(i) => {
                ghost[i] = ghost[i].moved_to(coord);
                i
            }
            DragTarget::Line => {
                let i = insertion_index(&self.base.path, &coord);
                ghost.insert(i, Waypoint::from(coord));
                i
            }
        };
        self.ghost = ghost;
        self.ghost_index = index;
        self.local = Some(coord);
        self.move_seq += 1;
    }

    fn draw(&self) -> MapCommand {
        MapCommand::DrawGhost {
            id: self.base.ghost_id(),
            points: self.ghost.iter().map(Waypoint::coordinate).collect(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    shapes: Vec<Shape>,
    selection: Option<Selection>,
    drag: Option<Drag>,
    next_drag_id: u64,
}

struct Shared {
    state: Mutex<SessionState>,
    edits: tokio::sync::Mutex<()>,
    service: Arc<dyn PathComputation>,
    port: Arc<dyn RemoteCommandPort>,
    bus: EventBus,
    polygon_period: Duration,
    path_period: Duration,
}

pub struct GeometryEditSession {
    shared: Arc<Shared>,
}

impl GeometryEditSession {
    pub fn new(
        service: Arc<dyn PathComputation>,
        port: Arc<dyn RemoteCommandPort>,
        bus: EventBus,
        settings: &PlanningSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                edits: tokio::sync::Mutex::new(()),
                service,
                port,
                bus,
                polygon_period: Duration::from_millis(settings.polygon_drag_ms),
                path_period: Duration::from_millis(settings.path_drag_ms),
            }),
        }
    }

    /// Replaces every shape with the plan's and redraws them.
    pub fn load_plan(&self, plan: Plan) {
        let (drag, commands) = {
            let mut state = self.shared.state.lock();
            state.shapes = plan.shapes;
            state.selection = None;
            let commands: Vec<MapCommand> = state.shapes.iter().flat_map(draw_shape).collect();
            (state.drag.take(), commands)
        };
        if let Some(drag) = drag {
            self.shared.discard(drag);
        }
        info!(job_id = %plan.job_id, shapes = commands.len(), "plan loaded");
        self.shared.execute(&commands);
    }

    pub fn shapes(&self) -> Vec<Shape> {
        self.shared.state.lock().shapes.clone()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.shared.state.lock().selection
    }

    pub fn select(&self, shape: usize, path: Option<usize>) -> Result<(), EditError> {
        let selection = Selection { shape, path };
        let drag = {
            let mut state = self.shared.state.lock();
            resolve_target(&state.shapes, selection)?;
            state.selection = Some(selection);
            state.drag.take()
        };
        if let Some(drag) = drag {
            self.shared.discard(drag);
        }
        Ok(())
    }

    /// Clears the selection, discarding any ghost and its pending lookups.
    pub fn deselect(&self) {
        let drag = {
            let mut state = self.shared.state.lock();
            state.selection = None;
            state.drag.take()
        };
        if let Some(drag) = drag {
            self.shared.discard(drag);
        }
    }

    /// Inserts `coord` at `at`, or appends it when `at` is `None`.
    pub async fn insert_point(&self, at: Option<usize>, coord: Coordinate) -> Result<(), EditError> {
        let selection = self.current_selection()?;
        let placement = at.map_or(Placement::Append, Placement::At);
        self.insert_with(selection, placement, coord).await
    }

    pub async fn edit_point(&self, index: usize, coord: Coordinate) -> Result<(), EditError> {
        let selection = self.current_selection()?;
        self.edit_with(selection, index, coord).await
    }

    /// The rendered point of the selected path closest to `coord`.
    pub fn snap(&self, coord: &Coordinate) -> Result<Option<Coordinate>, EditError> {
        let selection = self.current_selection()?;
        let target = resolve_target(&self.shared.state.lock().shapes, selection)?;
        Ok(snap_to_path(&target.path, coord))
    }

    pub fn begin_drag(&self, target: DragTarget) -> Result<(), EditError> {
        let selection = self.current_selection()?;
        let previous = {
            let mut state = self.shared.state.lock();
            let base = resolve_target(&state.shapes, selection)?;
            if let DragTarget::Waypoint(index) = target {
                let len = base.path.waypoints.len();
                if index >= len {
                    return Err(EditError::InvalidIndex { index, len });
                }
            }
            let period = match base.kind {
                TargetKind::Path => self.shared.path_period,
                TargetKind::PolygonBoundary | TargetKind::PolygonPath => self.shared.polygon_period,
            };
            let weak = Arc::downgrade(&self.shared);
            let throttle = Throttle::new(period, move |req: NearestRequest| {
                if let Some(shared) = weak.upgrade() {
                    shared.issue_nearest(req);
                }
            });
            state.next_drag_id += 1;
            let drag = Drag {
                id: state.next_drag_id,
                selection,
                target,
                ghost: base.path.waypoints.clone(),
                ghost_index: 0,
                base,
                local: None,
                move_seq: 0,
                issued_seq: 0,
                resolved: None,
                throttle,
            };
            state.drag.replace(drag)
        };
        if let Some(previous) = previous {
            self.shared.discard(previous);
        }
        Ok(())
    }

    /// Moves the ghost to `coord` and schedules a throttled snap lookup.
    pub fn drag_to(&self, coord: Coordinate) -> Result<(), EditError> {
        let (throttle, request, command) = {
            let mut state = self.shared.state.lock();
            let drag = state.drag.as_mut().ok_or(EditError::NoDrag)?;
            drag.project(coord);
            let request = NearestRequest {
                drag_id: drag.id,
                seq: drag.move_seq,
                waypoint: drag.ghost[drag.ghost_index],
            };
            (drag.throttle.clone(), request, drag.draw())
        };
        self.shared.execute(&[command]);
        throttle.call(request);
        Ok(())
    }

    pub fn ghost(&self) -> Option<Vec<Waypoint>> {
        self.shared.state.lock().drag.as_ref().map(|d| d.ghost.clone())
    }

    /// Where the dragged point is shown: the snapped position if the latest
    /// move has been resolved, the raw pointer position otherwise.
    pub fn ghost_position(&self) -> Option<Coordinate> {
        let state = self.shared.state.lock();
        let drag = state.drag.as_ref()?;
        match drag.resolved {
            Some((seq, point)) if seq == drag.move_seq => Some(point),
            _ => drag.local,
        }
    }

    /// Commits the drag and discards the ghost.
    pub async fn end_drag(&self) -> Result<(), EditError> {
        let drag = self
            .shared
            .state
            .lock()
            .drag
            .take()
            .ok_or(EditError::NoDrag)?;
        drag.throttle.cancel();
        self.shared.execute(&[MapCommand::RemoveGhost {
            id: drag.base.ghost_id(),
        }]);
        let Some(local) = drag.local else {
            return Ok(());
        };
        let point = drag.resolved.map(|(_, p)| p).unwrap_or(local);
        match drag.target {
            DragTarget::Waypoint(index) => self.edit_with(drag.selection, index, point).await,
            DragTarget::Line => self.insert_with(drag.selection, Placement::OnLine, point).await,
        }
    }

    /// Splits the selected path in two at `at`. Returns whether a split
    /// happened.
    pub fn split_selected(&self, at: &Coordinate) -> Result<bool, EditError> {
        let selection = self.current_selection()?;
        let (drag, commands) = {
            let mut state = self.shared.state.lock();
            let Some(Shape::Path(path)) = state.shapes.get(selection.shape) else {
                debug!("split ignored: selection is not a simple path");
                return Ok(false);
            };
            let Some((head, tail)) = split_path(path, at) else {
                return Ok(false);
            };
            let commands = vec![
                MapCommand::Remove {
                    id: path.id.clone(),
                },
                MapCommand::DrawPath {
                    id: head.id.clone(),
                    points: head.rendered_points(),
                },
                MapCommand::DrawPath {
                    id: tail.id.clone(),
                    points: tail.rendered_points(),
                },
            ];
            state.shapes[selection.shape] = Shape::Path(head);
            state.shapes.insert(selection.shape + 1, Shape::Path(tail));
            state.selection = Some(Selection {
                shape: selection.shape,
                path: None,
            });
            (state.drag.take(), commands)
        };
        if let Some(drag) = drag {
            self.shared.discard(drag);
        }
        self.shared.execute(&commands);
        Ok(true)
    }

    fn current_selection(&self) -> Result<Selection, EditError> {
        self.shared.state.lock().selection.ok_or_else(|| {
            warn!("edit ignored: nothing selected");
            EditError::NoCurrentSelection
        })
    }

    async fn insert_with(
        &self,
        selection: Selection,
        placement: Placement,
        coord: Coordinate,
    ) -> Result<(), EditError> {
        let _serial = self.shared.edits.lock().await;
        let target = resolve_target(&self.shared.state.lock().shapes, selection)?;
        let len = target.path.waypoints.len();
        let index = match placement {
            Placement::At(index) => index,
            Placement::Append => len,
            Placement::OnLine => insertion_index(&target.path, &coord),
        };
        if index > len {
            return Err(EditError::InvalidIndex { index, len });
        }
        let mut candidate = target.path.waypoints.clone();
        candidate.insert(index, Waypoint::from(coord));
        self.shared.commit_candidate(&target, candidate).await
    }

    async fn edit_with(
        &self,
        selection: Selection,
        index: usize,
        coord: Coordinate,
    ) -> Result<(), EditError> {
        let _serial = self.shared.edits.lock().await;
        let target = resolve_target(&self.shared.state.lock().shapes, selection)?;
        let len = target.path.waypoints.len();
        if index >= len {
            return Err(EditError::InvalidIndex { index, len });
        }
        let mut candidate = target.path.waypoints.clone();
        candidate[index] = candidate[index].moved_to(coord);
        self.shared.commit_candidate(&target, candidate).await
    }
}

impl Shared {
    async fn commit_candidate(
        &self,
        target: &EditTarget,
        candidate: Vec<Waypoint>,
    ) -> Result<(), EditError> {
        let arcs = if target.kind == TargetKind::Path && candidate.len() >= 2 {
            match self.service.resolve_path(&candidate).await {
                Ok(arcs) => Some(arcs),
                Err(err) => {
                    let detail = format!("{err:#}");
                    warn!(path_id = %target.path.id, "path resolution failed: {detail}");
                    self.bus.publish(ConsoleEvent::Notification(
                        Notification::arcs_not_retrieved(&detail),
                    ));
                    return Err(EditError::PathResolution(detail));
                }
            }
        } else {
            None
        };
        let command = {
            let mut state = self.state.lock();
            apply_commit(&mut state.shapes, target, candidate, arcs)?
        };
        self.execute(&[command]);
        Ok(())
    }

    fn issue_nearest(self: Arc<Self>, req: NearestRequest) {
        {
            let mut state = self.state.lock();
            match state.drag.as_mut() {
                Some(drag) if drag.id == req.drag_id => drag.issued_seq = req.seq,
                _ => return,
            }
        }
        tokio::spawn(async move {
            let outcome = self.service.nearest_point(&req.waypoint).await;
            self.apply_nearest(req, outcome);
        });
    }

    fn apply_nearest(&self, req: NearestRequest, outcome: anyhow::Result<Coordinate>) {
        let point = match outcome {
            Ok(point) => point,
            Err(err) => {
                debug!("nearest point lookup failed: {err:#}");
                return;
            }
        };
        let command = {
            let mut state = self.state.lock();
            let Some(drag) = state.drag.as_mut().filter(|d| d.id == req.drag_id) else {
                debug!("ghost discarded; dropping nearest point");
                return;
            };
            if req.seq != drag.issued_seq {
                return;
            }
            drag.resolved = Some((req.seq, point));
            if req.seq != drag.move_seq {
                return;
            }
            let index = drag.ghost_index;
            drag.ghost[index] = drag.ghost[index].moved_to(point);
            drag.draw()
        };
        self.execute(&[command]);
    }

    fn discard(&self, drag: Drag) {
        drag.throttle.cancel();
        self.execute(&[MapCommand::RemoveGhost {
            id: drag.base.ghost_id(),
        }]);
    }

    fn execute(&self, commands: &[MapCommand]) {
        if commands.is_empty() {
            return;
        }
        if let Err(err) = self.port.execute(commands) {
            warn!("map command batch failed: {err:#}");
        }
    }
}

fn resolve_target(shapes: &[Shape], selection: Selection) -> Result<EditTarget, EditError> {
    match (shapes.get(selection.shape), selection.path) {
        (None, _) => Err(EditError::NoCurrentSelection),
        (Some(Shape::Path(path)), _) => Ok(EditTarget {
            shape_id: path.id.clone(),
            kind: TargetKind::Path,
            path: path.clone(),
        }),
        (Some(Shape::Polygon(polygon)), None) => Ok(EditTarget {
            shape_id: polygon.id.clone(),
            kind: TargetKind::PolygonBoundary,
            path: Path {
                id: polygon.id.clone(),
                name: polygon.name.clone(),
                waypoints: polygon.waypoints.clone(),
                arcs: None,
                capture_interval_m: None,
            },
        }),
        (Some(Shape::Polygon(polygon)), Some(index)) => polygon
            .paths
            .get(index)
            .map(|path| EditTarget {
                shape_id: polygon.id.clone(),
                kind: TargetKind::PolygonPath,
                path: path.clone(),
            })
            .ok_or(EditError::InvalidIndex {
                index,
                len: polygon.paths.len(),
            }),
    }
}

fn apply_commit(
    shapes: &mut [Shape],
    target: &EditTarget,
    waypoints: Vec<Waypoint>,
    arcs: Option<Vec<PathArc>>,
) -> Result<MapCommand, EditError> {
    let shape = shapes
        .iter_mut()
        .find(|s| s.id() == target.shape_id)
        .ok_or(EditError::NoCurrentSelection)?;
    match (shape, target.kind) {
        (Shape::Path(path), TargetKind::Path) => {
            match arcs {
                Some(arcs) => path.commit_resolved(waypoints, arcs),
                None => path.set_waypoints(waypoints),
            }
            Ok(draw_path(path))
        }
        (Shape::Polygon(polygon), TargetKind::PolygonBoundary) => {
            polygon.waypoints = waypoints;
            Ok(MapCommand::DrawPolygon {
                id: polygon.id.clone(),
                ring: polygon.ring(),
            })
        }
        (Shape::Polygon(polygon), TargetKind::PolygonPath) => {
            let path = polygon
                .paths
                .iter_mut()
                .find(|p| p.id == target.path.id)
                .ok_or(EditError::NoCurrentSelection)?;
            path.set_waypoints(waypoints);
            Ok(draw_path(path))
        }
        _ => Err(EditError::NoCurrentSelection),
    }
}

fn draw_path(path: &Path) -> MapCommand {
    MapCommand::DrawPath {
        id: path.id.clone(),
        points: path.rendered_points(),
    }
}

fn draw_shape(shape: &Shape) -> Vec<MapCommand> {
    match shape {
        Shape::Path(path) => vec![draw_path(path)],
        Shape::Polygon(polygon) => std::iter::once(MapCommand::DrawPolygon {
            id: polygon.id.clone(),
            ring: polygon.ring(),
        })
        .chain(polygon.paths.iter().map(draw_path))
        .collect(),
    }
}
