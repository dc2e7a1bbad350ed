#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    /// The path service rejected or failed the request. Committed state is
    /// unchanged.
    #[error("arcs not retrieved: {0}")]
    PathResolution(String),
    #[error("no shape is selected")]
    NoCurrentSelection,
    #[error("waypoint index {index} out of range for {len} waypoints")]
    InvalidIndex { index: usize, len: usize },
    #[error("no drag in progress")]
    NoDrag,
}

impl EditError {
    /// Whether the user can simply try again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EditError::PathResolution(_))
    }
}
