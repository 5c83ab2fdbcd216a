//! Synthetic shelf scene (`stub://`).
//!
//! A tilted shelf plane with a row of slots, each holding an object that sits
//! closer to the camera than the shelf. On a fixed cadence one slot is emptied
//! for a cycle and then refilled, moving on to the next slot afterwards.
//! Readings carry small noise and occasional dropouts (value 0), the way a
//! structured-light sensor does.

use anyhow::{anyhow, Result};
use image::{Luma, Rgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Instant;

use super::{frame_interval, FrameSource, SourceConfig, SourceStats};
use crate::frame::{ColorFrame, ColorImage, DepthFrame, DepthImage, FrameEvent};
use crate::zone::IVec2;

const SHELF_DEPTH_MM: f32 = 900.0;
const SHELF_TILT_MM_PER_ROW: f32 = 0.5;
const OBJECT_HEIGHT_MM: f32 = 80.0;
const SLOT_COUNT: u32 = 4;
const NOISE_UNITS: i32 = 2;
const DROPOUT_PROBABILITY: f64 = 0.01;

pub struct SyntheticSource {
    config: SourceConfig,
    rng: StdRng,
    cycle_frames: u64,
    depth_count: u64,
    color_count: u64,
    pending: VecDeque<FrameEvent>,
    last_frame_at: Option<Instant>,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let cycle_frames = u64::from(config.target_fps.max(1)) * 4;
        Ok(Self::with_rng(config, StdRng::from_entropy(), cycle_frames))
    }

    /// Deterministic scene for tests: fixed seed and slot cadence.
    pub fn seeded(config: SourceConfig, seed: u64, cycle_frames: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed), cycle_frames)
    }

    fn with_rng(config: SourceConfig, rng: StdRng, cycle_frames: u64) -> Self {
        Self {
            config,
            rng,
            cycle_frames: cycle_frames.max(1),
            depth_count: 0,
            color_count: 0,
            pending: VecDeque::new(),
            last_frame_at: None,
            connected: false,
        }
    }

    /// Depth-frame rectangles `(position, size)` of the object slots.
    pub fn slot_rects(&self) -> Vec<(IVec2, IVec2)> {
        let w = self.config.width as i32;
        let h = self.config.height as i32;
        let pitch = w / SLOT_COUNT as i32;
        let slot_w = (pitch / 2).max(1);
        let slot_h = (h / 6).max(1);
        (0..SLOT_COUNT as i32)
            .map(|k| {
                let x = k * pitch + (pitch - slot_w) / 2;
                let y = (h - slot_h) / 2;
                (IVec2::new(x, y), IVec2::new(slot_w, slot_h))
            })
            .collect()
    }

    /// Slot that is currently empty, if any, for the given frame number.
    fn empty_slot(&self, frame: u64) -> Option<usize> {
        let phase = frame / self.cycle_frames;
        if phase % 2 == 0 {
            return None;
        }
        Some(((phase / 2) % SLOT_COUNT as u64) as usize)
    }

    fn slot_at(&self, slots: &[(IVec2, IVec2)], x: u32, y: u32) -> Option<usize> {
        let (x, y) = (x as i32, y as i32);
        slots.iter().position(|(pos, size)| {
            x >= pos.x && x < pos.x + size.x && y >= pos.y && y < pos.y + size.y
        })
    }

    fn render_depth(&mut self) -> DepthImage {
        let slots = self.slot_rects();
        let empty = self.empty_slot(self.depth_count);
        let scale = self.config.depth_scale_mm;
        let (w, h) = (self.config.width, self.config.height);
        let mut image = DepthImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                if self.rng.gen_bool(DROPOUT_PROBABILITY) {
                    continue;
                }
                let mut mm = SHELF_DEPTH_MM + y as f32 * SHELF_TILT_MM_PER_ROW;
                if let Some(slot) = self.slot_at(&slots, x, y) {
                    if Some(slot) != empty {
                        mm -= OBJECT_HEIGHT_MM;
                    }
                }
                let units = (mm / scale).round() as i32 + self.rng.gen_range(-NOISE_UNITS..=NOISE_UNITS);
                image.put_pixel(x, y, Luma([units.clamp(1, u16::MAX as i32) as u16]));
            }
        }
        image
    }

    fn render_color(&self) -> ColorImage {
        let slots = self.slot_rects();
        let empty = self.empty_slot(self.depth_count);
        let (dw, dh) = (self.config.width.max(1), self.config.height.max(1));
        let (cw, ch) = (self.config.color_width, self.config.color_height);
        ColorImage::from_fn(cw, ch, |x, y| {
            let dx = x * dw / cw.max(1);
            let dy = y * dh / ch.max(1);
            match self.slot_at(&slots, dx, dy) {
                Some(slot) if Some(slot) != empty => {
                    let tint = 60 + 40 * slot as u8;
                    Rgb([tint, 200 - tint / 2, 90])
                }
                _ => Rgb([150, 140, 120]),
            }
        })
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.config.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic source needs a non-empty depth frame size"));
        }
        if self.config.color_width == 0 || self.config.color_height == 0 {
            return Err(anyhow!("synthetic source needs a non-empty color frame size"));
        }
        if !self.config.depth_scale_mm.is_finite() || self.config.depth_scale_mm <= 0.0 {
            return Err(anyhow!("depth scale must be positive"));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{} depth, {}x{} color)",
            self.config.url,
            self.config.width,
            self.config.height,
            self.config.color_width,
            self.config.color_height
        );
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<FrameEvent>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.pace();
        let depth = self.render_depth();
        let color = self.render_color();
        self.depth_count += 1;
        self.color_count += 1;
        self.pending.push_back(FrameEvent::Color(ColorFrame::new(color, self.color_count)));
        Ok(Some(FrameEvent::Depth(DepthFrame::new(
            depth,
            self.config.depth_scale_mm,
            self.depth_count,
        ))))
    }

    fn depth_to_mm_scale(&self) -> f32 {
        self.config.depth_scale_mm
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            depth_frames: self.depth_count,
            color_frames: self.color_count,
            source: self.config.url.clone(),
        }
    }
}
