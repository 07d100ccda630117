//! Wire message definitions shared by the relay and its clients.
//!
//! Only one message kind exists today, the position update:
//!
//! ```json
//! { "type": "pos", "id": "a1", "name": "Player", "x": 1, "y": 2, "z": 3, "color": "#3498db" }
//! ```
//!
//! `name` and `color` are optional on input and always present on output.

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Wire tag of a position update.
pub const POSITION_KIND: &str = "pos";

/// Display name used when a client omits `name`.
pub const DEFAULT_NAME: &str = "Player";

/// Color used when a client omits `color`.
pub const DEFAULT_COLOR: &str = "#3498db";

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

/// Message kinds understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// "entity X is now at (x, y, z)"
    #[serde(rename = "pos")]
    Position,
}

/// A normalized position update.
///
/// Coordinates are kept as JSON numbers so the relay forwards them exactly as
/// received: an integer `1` goes out as `1`, not `1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Caller-supplied entity identifier (not the connection identifier)
    pub id: String,
    #[serde(default = "default_name")]
    pub name: String,
    pub x: Number,
    pub y: Number,
    pub z: Number,
    #[serde(default = "default_color")]
    pub color: String,
}

impl PositionUpdate {
    /// Builds an update from floating point coordinates.
    ///
    /// Returns `None` if any coordinate is NaN or infinite, since JSON cannot
    /// carry those.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        x: f64,
        y: f64,
        z: f64,
        color: impl Into<String>,
    ) -> Option<Self> {
        Some(Self {
            kind: MessageKind::Position,
            id: id.into(),
            name: name.into(),
            x: Number::from_f64(x)?,
            y: Number::from_f64(y)?,
            z: Number::from_f64(z)?,
            color: color.into(),
        })
    }

    /// Coordinates as `f64`.
    pub fn coordinates(&self) -> (f64, f64, f64) {
        (
            self.x.as_f64().unwrap_or_default(),
            self.y.as_f64().unwrap_or_default(),
            self.z.as_f64().unwrap_or_default(),
        )
    }

    /// Serializes the update to its wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let update = PositionUpdate::new("a1", "Runner", 1.5, -2.0, 3.25, "#ff0000").unwrap();
        let value: serde_json::Value = serde_json::from_str(&update.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "pos",
                "id": "a1",
                "name": "Runner",
                "x": 1.5,
                "y": -2.0,
                "z": 3.25,
                "color": "#ff0000"
            })
        );
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let update: PositionUpdate =
            serde_json::from_str(r#"{"type":"pos","id":"b","x":0,"y":1,"z":2}"#).unwrap();
        assert_eq!(update.name, DEFAULT_NAME);
        assert_eq!(update.color, DEFAULT_COLOR);
        assert_eq!(update.coordinates(), (0.0, 1.0, 2.0));
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        assert!(PositionUpdate::new("a", "n", f64::NAN, 0.0, 0.0, "#000000").is_none());
        assert!(PositionUpdate::new("a", "n", 0.0, f64::INFINITY, 0.0, "#000000").is_none());
    }
}
