//! Shelfwatch
//!
//! Depth-camera shelf monitoring: operators calibrate rectangular zones over
//! the slots of a shelf, each zone remembers a background depth snapshot, and
//! every incoming depth frame is compared against those snapshots to decide
//! whether an item has been picked up or put back. Each transition bumps the
//! zone's usage count and is forwarded as a best-effort HTTP notification.
//!
//! # Module Structure
//!
//! - `zone` / `registry`: calibrated zones, stable ids, selection
//! - `frame` / `ingest`: depth + color frames and the sources producing them
//! - `detect`: per-pixel classification and per-zone hysteresis
//! - `notify`: queued pickup/return notifications
//! - `store`: `zones.json` plus PNG side-files
//! - `api`: loopback calibration control server
//! - `config`: file + environment configuration for the binaries
//! - `logging`: stderr or log-file logger for the binaries

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod store;
pub mod zone;

pub use config::MonitorConfig;
pub use detect::{Action, DetectorConfig, OccupancyDetector, TransitionEvent};
pub use frame::{ColorFrame, ColorImage, DepthFrame, DepthImage, FrameEvent, SharedFrames};
pub use ingest::{open_source, subscribe, FrameSource, SourceConfig};
pub use notify::{Dispatcher, HttpNotifier, HttpNotifierConfig, LogNotifier, Notifier};
pub use registry::{SharedRegistry, ZoneRegistry};
pub use store::{LoadReport, RegistryStore};
pub use zone::{IVec2, Zone, ZoneId, ZoneState};
