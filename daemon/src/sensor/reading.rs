//! Sensor board reply format
//!
//! The board answers each poll with one line such as
//! `y: 12.50, z: -3.00, pressure: 1`.

use crate::state::Orientation;

use super::SensorError;

/// One reading from the local sensor board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub orientation: Orientation,
    pub pressure: bool,
}

/// Parse a reply line; every field must be present
pub fn parse_reading(line: &str) -> Result<SensorReading, SensorError> {
    let invalid = |reason: &str| SensorError::Parse {
        line: line.trim().to_string(),
        reason: reason.to_string(),
    };

    let mut y = None;
    let mut z = None;
    let mut pressure = None;

    for field in line.trim().split(',') {
        let (key, value) = field
            .split_once(':')
            .ok_or_else(|| invalid("field without ':'"))?;
        let value = value.trim();

        match key.trim() {
            "y" => y = Some(parse_angle(value).ok_or_else(|| invalid("bad y"))?),
            "z" => z = Some(parse_angle(value).ok_or_else(|| invalid("bad z"))?),
            "pressure" => pressure = Some(value == "1"),
            _ => {}
        }
    }

    match (y, z, pressure) {
        (Some(y), Some(z), Some(pressure)) => Ok(SensorReading {
            orientation: Orientation { y, z },
            pressure,
        }),
        _ => Err(invalid("missing field")),
    }
}

/// Angles arrive as decimals and are truncated to whole degrees
fn parse_angle(value: &str) -> Option<i32> {
    let angle: f64 = value.parse().ok()?;
    angle.is_finite().then_some(angle.trunc() as i32)
}
