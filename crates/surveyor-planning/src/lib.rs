//! Plan editing: selection, point insertion and edits, drag ghosts, splits.
//!
//! Routable paths are resolved through a [`PathComputation`] before any edit
//! is committed; everything drawn goes out through a [`RemoteCommandPort`].

pub mod command_port;
pub mod error;
pub mod geometry;
pub mod service;
pub mod session;
pub mod split;
pub mod throttle;

pub use command_port::{LoggingCommandPort, MapCommand, RemoteCommandPort};
pub use error::EditError;
pub use service::{HttpPathService, PathComputation};
pub use session::{DragTarget, GeometryEditSession, Selection};
pub use split::split_path;
pub use throttle::Throttle;
