//! Commands for the external map/3D engine.

use serde::Serialize;
use serde_json::Value;
use surveyor_types::Coordinate;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MapCommand {
    DrawPath { id: String, points: Vec<Coordinate> },
    DrawPolygon { id: String, ring: Vec<Coordinate> },
    DrawGhost { id: String, points: Vec<Coordinate> },
    RemoveGhost { id: String },
    Remove { id: String },
}

/// Opaque executor owned by the rendering side. A batch is applied as a unit.
pub trait RemoteCommandPort: Send + Sync {
    fn execute(&self, commands: &[MapCommand]) -> anyhow::Result<Value>;
}

/// Port for headless runs: commands are only traced.
#[derive(Debug, Default)]
pub struct LoggingCommandPort;

impl RemoteCommandPort for LoggingCommandPort {
    fn execute(&self, commands: &[MapCommand]) -> anyhow::Result<Value> {
        let batch = serde_json::to_value(commands)?;
        tracing::debug!(target: "surveyor.map", count = commands.len(), %batch, "map commands");
        Ok(Value::Null)
    }
}
