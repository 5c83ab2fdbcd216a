//! Depth frame sources.
//!
//! This module provides sources for depth + color frame pairs:
//! - Synthetic shelf scene (`stub://`), for demos and tests
//! - Replay of recorded 16-bit PNG depth frames from a local directory
//!
//! Every source runs behind `subscribe`, which validates it once, then pushes
//! `FrameEvent`s from a capture thread into a bounded channel with a single
//! consumer. The consumer handles each event to completion before taking the
//! next, so depth frames are evaluated strictly in arrival order.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::{ColorFrame, DepthFrame, FrameEvent};

pub mod replay;
pub mod synthetic;

pub use replay::ReplaySource;
pub use synthetic::SyntheticSource;

/// Configuration shared by all frame sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://name`, `replay:///path/to/dir`, or a plain local directory.
    pub url: String,
    /// Target frame rate (frames per second). Sources pace themselves to this rate.
    pub target_fps: u32,
    /// Depth frame size (synthetic source only).
    pub width: u32,
    pub height: u32,
    /// Color frame size (synthetic source only).
    pub color_width: u32,
    pub color_height: u32,
    /// Millimeters per depth unit for sources without a device-reported scale.
    pub depth_scale_mm: f32,
    /// Mirror both streams left-to-right before delivery.
    pub flip_horizontal: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://shelf".to_string(),
            target_fps: 15,
            width: 320,
            height: 240,
            color_width: 640,
            color_height: 480,
            depth_scale_mm: 1.0,
            flip_horizontal: false,
        }
    }
}

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub depth_frames: u64,
    pub color_frames: u64,
    pub source: String,
}

/// A device (or stand-in) producing aligned depth and color frames.
pub trait FrameSource: Send {
    /// Open and validate the source. Failure here is fatal for detection.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is ready. `Ok(None)` means the stream ended.
    fn next_event(&mut self) -> Result<Option<FrameEvent>>;

    /// Millimeters per native depth unit.
    fn depth_to_mm_scale(&self) -> f32;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Build the source selected by `config.url`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())?));
    }
    if let Some(path) = config.url.strip_prefix("replay://") {
        return Ok(Box::new(ReplaySource::new(path, config.clone())?));
    }
    if config.url.contains("://") {
        return Err(anyhow!(
            "unsupported frame source '{}'; expected stub://, replay:// or a local directory",
            config.url
        ));
    }
    Ok(Box::new(ReplaySource::new(&config.url, config.clone())?))
}

/// Live subscription to a frame source running on its own capture thread.
pub struct FrameSubscription {
    receiver: Receiver<FrameEvent>,
    shutdown: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    depth_to_mm_scale: f32,
    join: Option<JoinHandle<()>>,
}

/// Result of waiting on a subscription.
pub enum Delivery {
    Frame(FrameEvent),
    Idle,
    Closed,
}

impl FrameSubscription {
    /// Wait up to `timeout` for the next frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Delivery {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Delivery::Frame(event),
            Err(RecvTimeoutError::Timeout) => Delivery::Idle,
            Err(RecvTimeoutError::Disconnected) => Delivery::Closed,
        }
    }

    /// Whether the source reported itself healthy after its last frame.
    /// Turns false once the capture thread exits.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Millimeters per native depth unit, as reported by the source at startup.
    pub fn depth_to_mm_scale(&self) -> f32 {
        self.depth_to_mm_scale
    }

    /// Stop the capture thread. Frames still queued are dropped.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.receiver);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("frame capture thread panicked"))?;
        }
        Ok(())
    }
}

/// Connect `source` and start pushing its frames into a channel of `capacity`.
///
/// Connection errors and an unusable depth scale are returned directly;
/// errors after startup end the stream and are logged.
pub fn subscribe(
    mut source: Box<dyn FrameSource>,
    capacity: usize,
    flip_horizontal: bool,
) -> Result<FrameSubscription> {
    source.connect()?;
    let depth_to_mm_scale = source.depth_to_mm_scale();
    if !(depth_to_mm_scale.is_finite() && depth_to_mm_scale > 0.0) {
        return Err(anyhow!(
            "frame source {} reports unusable depth scale {}",
            source.stats().source,
            depth_to_mm_scale
        ));
    }
    log::info!(
        "frame source {} ready ({} mm per depth unit)",
        source.stats().source,
        depth_to_mm_scale
    );

    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let shutdown = Arc::new(AtomicBool::new(false));
    let healthy = Arc::new(AtomicBool::new(source.is_healthy()));
    let shutdown_thread = shutdown.clone();
    let healthy_thread = healthy.clone();
    let join = std::thread::spawn(move || {
        let mut last_stats_log = Instant::now();
        while !shutdown_thread.load(Ordering::SeqCst) {
            let next = source.next_event();
            healthy_thread.store(source.is_healthy(), Ordering::SeqCst);
            let mut event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    log::info!("frame source {} ended", source.stats().source);
                    break;
                }
                Err(err) => {
                    log::error!("frame source stopped: {}", err);
                    break;
                }
            };
            if flip_horizontal {
                event.flip_horizontal();
            }
            if tx.send(event).is_err() {
                break;
            }
            if last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
                let stats = source.stats();
                log::info!(
                    "frame source {}: depth_frames={} color_frames={} healthy={}",
                    stats.source,
                    stats.depth_frames,
                    stats.color_frames,
                    source.is_healthy()
                );
                last_stats_log = Instant::now();
            }
        }
        healthy_thread.store(false, Ordering::SeqCst);
        let stats = source.stats();
        log::debug!(
            "capture thread exiting: depth_frames={} color_frames={} source={}",
            stats.depth_frames,
            stats.color_frames,
            stats.source
        );
    });
    Ok(FrameSubscription {
        receiver: rx,
        shutdown,
        healthy,
        depth_to_mm_scale,
        join: Some(join),
    })
}

/// Pull frames until both a depth and a color frame are available.
pub fn grab_pair(
    source: &mut dyn FrameSource,
    max_events: usize,
    flip_horizontal: bool,
) -> Result<(DepthFrame, ColorFrame)> {
    let mut depth = None;
    let mut color = None;
    for _ in 0..max_events {
        let event = source.next_event()?.map(|mut event| {
            if flip_horizontal {
                event.flip_horizontal();
            }
            event
        });
        match event {
            Some(FrameEvent::Depth(frame)) => depth = Some(frame),
            Some(FrameEvent::Color(frame)) => color = Some(frame),
            None => break,
        }
        if depth.is_some() && color.is_some() {
            break;
        }
    }
    match (depth, color) {
        (Some(depth), Some(color)) => Ok((depth, color)),
        _ => Err(anyhow!(
            "frame source delivered no depth/color pair within {} events",
            max_events
        )),
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(1.0 / target_fps as f64)
}
