use crate::zone::ZoneState;

/// Depth thresholds converted into sensor-native units for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Minimum increase in depth that counts as removal evidence.
    pub pickup_units: f32,
    /// Maximum absolute deviation that counts as restored evidence.
    pub return_units: f32,
    /// Optional ceiling on the removal increase; larger jumps are treated as spikes.
    pub max_units: Option<f32>,
}

impl Thresholds {
    /// Convert millimeter thresholds with the frame's mm-per-unit scale.
    pub fn from_mm(
        pickup_mm: f32,
        return_mm: f32,
        max_mm: Option<f32>,
        mm_per_unit: f32,
    ) -> Self {
        Self {
            pickup_units: pickup_mm / mm_per_unit,
            return_units: return_mm / mm_per_unit,
            max_units: max_mm.map(|mm| mm / mm_per_unit),
        }
    }
}

/// What a single pixel says about its zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evidence {
    None,
    /// Depth moved away from the camera: the object is gone.
    Removed,
    /// Depth is back near the calibrated baseline.
    Restored,
}

/// Classify one pixel against its background for a zone in `state`.
///
/// Only the evidence kind relevant to `state` is ever reported. A current
/// reading of 0 is a sensor dropout and never counts.
pub fn classify(background: u16, current: u16, state: ZoneState, thresholds: &Thresholds) -> Evidence {
    if current == 0 {
        return Evidence::None;
    }
    let diff = current as f32 - background as f32;
    match state {
        ZoneState::Vacant => {
            let above_floor = diff > thresholds.pickup_units;
            let below_ceiling = thresholds.max_units.map_or(true, |max| diff < max);
            if above_floor && below_ceiling {
                Evidence::Removed
            } else {
                Evidence::None
            }
        }
        ZoneState::InUse => {
            if diff.abs() < thresholds.return_units {
                Evidence::Restored
            } else {
                Evidence::None
            }
        }
    }
}

/// Live-minus-background difference saturated to a byte, 0 for dropouts.
pub fn signed_diff(background: u16, current: u16) -> i8 {
    if current == 0 {
        return 0;
    }
    let diff = current as i32 - background as i32;
    diff.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}
