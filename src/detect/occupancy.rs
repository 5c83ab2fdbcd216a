//! Per-frame zone occupancy evaluation.
//!
//! Every zone is judged on the current depth frame alone. A vacant zone flips
//! to in-use when more than `pickup_ratio` of its area shows removal evidence;
//! an in-use zone flips back when more than `return_ratio` of its area is near
//! the calibrated baseline again. The two ratios are the only hysteresis.

use anyhow::{anyhow, Result};

use super::classify::{classify, signed_diff, Evidence, Thresholds};
use super::event::{Action, TransitionEvent};
use crate::frame::{DepthFrame, DepthImage};
use crate::registry::ZoneRegistry;
use crate::zone::{Zone, ZoneState};

/// Detector tuning. Ratios are fractions of zone area, thresholds are millimeters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorConfig {
    pub pickup_ratio: f32,
    pub return_ratio: f32,
    pub pickup_threshold_mm: f32,
    pub return_threshold_mm: f32,
    pub max_diff_mm: Option<f32>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pickup_ratio: 0.3,
            return_ratio: 0.5,
            pickup_threshold_mm: 30.0,
            return_threshold_mm: 20.0,
            max_diff_mm: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("pickup_ratio", self.pickup_ratio),
            ("return_ratio", self.return_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, ratio));
            }
        }
        for (name, mm) in [
            ("pickup_threshold_mm", self.pickup_threshold_mm),
            ("return_threshold_mm", self.return_threshold_mm),
        ] {
            if !mm.is_finite() || mm <= 0.0 {
                return Err(anyhow!("{} must be a positive number, got {}", name, mm));
            }
        }
        if let Some(max) = self.max_diff_mm {
            if !max.is_finite() || max <= self.pickup_threshold_mm {
                return Err(anyhow!(
                    "max_diff_mm ({}) must exceed pickup_threshold_mm ({})",
                    max,
                    self.pickup_threshold_mm
                ));
            }
        }
        Ok(())
    }

    pub fn thresholds(&self, mm_per_unit: f32) -> Thresholds {
        Thresholds::from_mm(
            self.pickup_threshold_mm,
            self.return_threshold_mm,
            self.max_diff_mm,
            mm_per_unit,
        )
    }

    fn ratio_for(&self, state: ZoneState) -> f32 {
        match state {
            ZoneState::Vacant => self.pickup_ratio,
            ZoneState::InUse => self.return_ratio,
        }
    }
}

/// Number of evidence pixels that must be exceeded for a flip.
pub fn pixel_count_threshold(area: u64, ratio: f32) -> u64 {
    (area as f64 * ratio as f64).round() as u64
}

/// Outcome of evaluating one zone on one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneEvaluation {
    /// State at the start of the evaluation; selects predicate and ratio.
    pub state: ZoneState,
    pub evidence: u64,
    pub threshold: u64,
    pub transition: Option<TransitionEvent>,
}

pub struct OccupancyDetector {
    config: DetectorConfig,
}

impl OccupancyDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Evaluate every zone against `frame` and return the transitions, in
    /// registry order. State changes are committed before this returns.
    pub fn evaluate(&self, registry: &mut ZoneRegistry, frame: &DepthFrame) -> Vec<TransitionEvent> {
        if !frame.mm_per_unit.is_finite() || frame.mm_per_unit <= 0.0 {
            log::warn!(
                "skipping depth frame #{}: invalid depth scale {}",
                frame.sequence,
                frame.mm_per_unit
            );
            return Vec::new();
        }
        let thresholds = self.config.thresholds(frame.mm_per_unit);
        registry
            .iter_mut()
            .filter_map(|zone| self.evaluate_zone(zone, &frame.image, &thresholds))
            .filter_map(|outcome| outcome.transition)
            .collect()
    }

    /// Evaluate a single zone. Returns `None` when the zone cannot be compared
    /// against this frame (geometry outside the frame or stale background).
    pub fn evaluate_zone(
        &self,
        zone: &mut Zone,
        live: &DepthImage,
        thresholds: &Thresholds,
    ) -> Option<ZoneEvaluation> {
        let (x0, y0, w, h) = zone.depth_rect();
        if zone.background().dimensions() != (w, h) || w == 0 || h == 0 {
            log::debug!("{} ({}) skipped: background does not match size", zone.id(), zone.name());
            return None;
        }
        if x0 + w > live.width() || y0 + h > live.height() {
            log::debug!(
                "{} ({}) skipped: outside {}x{} frame",
                zone.id(),
                zone.name(),
                live.width(),
                live.height()
            );
            return None;
        }

        let state = zone.state();
        let threshold = pixel_count_threshold(zone.area(), self.config.ratio_for(state));
        let wanted = match state {
            ZoneState::Vacant => Evidence::Removed,
            ZoneState::InUse => Evidence::Restored,
        };

        let mut evidence = 0u64;
        let mut diffs = Vec::with_capacity((w * h) as usize);
        {
            let background = zone.background();
            for j in 0..h {
                for i in 0..w {
                    let bg = background.get_pixel(i, j).0[0];
                    let cur = live.get_pixel(x0 + i, y0 + j).0[0];
                    diffs.push(signed_diff(bg, cur));
                    if classify(bg, cur, state, thresholds) == wanted {
                        evidence += 1;
                    }
                }
            }
        }
        let mask = zone.diagnostic_mask_mut();
        for (idx, value) in diffs.into_iter().enumerate() {
            let idx = idx as u32;
            mask.set(idx % w, idx / w, value);
        }

        let transition = if evidence > threshold {
            let new_state = zone.flip_state();
            let action = match new_state {
                ZoneState::InUse => Action::Pickup,
                ZoneState::Vacant => Action::Return,
            };
            log::info!(
                "{} ({}) {}: {}/{} evidence pixels > {}, usage_count={}",
                zone.id(),
                zone.name(),
                action,
                evidence,
                zone.area(),
                threshold,
                zone.usage_count()
            );
            Some(TransitionEvent {
                zone_id: zone.id(),
                zone_name: zone.name().to_string(),
                action,
                usage_count: zone.usage_count(),
            })
        } else {
            None
        };

        Some(ZoneEvaluation {
            state,
            evidence,
            threshold,
            transition,
        })
    }
}
