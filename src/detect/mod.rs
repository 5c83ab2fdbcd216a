mod classify;
mod event;
mod occupancy;

pub use classify::{classify, signed_diff, Evidence, Thresholds};
pub use event::{Action, TransitionEvent};
pub use occupancy::{
    pixel_count_threshold, DetectorConfig, OccupancyDetector, ZoneEvaluation,
};
