//! Depth and color frames as delivered by a frame source.
//!
//! - `DepthFrame`: 16-bit depth samples plus the device's mm-per-unit scale.
//! - `ColorFrame`: aligned RGB frame, used only for reference snapshots.
//! - `SharedFrames`: latest-frame cache read by calibration.
//!
//! A depth sample of 0 means the sensor had no valid reading for that pixel.

use anyhow::{anyhow, Result};
use image::{ImageBuffer, Luma, RgbImage};
use std::sync::{Arc, Mutex};

/// Single-channel 16-bit depth image in sensor-native units.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Aligned RGB color image.
pub type ColorImage = RgbImage;

#[derive(Clone, Debug)]
pub struct DepthFrame {
    pub image: DepthImage,
    /// Millimeters per native depth unit, as reported by the device.
    pub mm_per_unit: f32,
    pub sequence: u64,
}

impl DepthFrame {
    pub fn new(image: DepthImage, mm_per_unit: f32, sequence: u64) -> Self {
        Self {
            image,
            mm_per_unit,
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Sample at `(x, y)`, or 0 (no reading) outside the frame.
    pub fn sample(&self, x: u32, y: u32) -> u16 {
        if x >= self.image.width() || y >= self.image.height() {
            return 0;
        }
        self.image.get_pixel(x, y).0[0]
    }
}

#[derive(Clone, Debug)]
pub struct ColorFrame {
    pub image: ColorImage,
    pub sequence: u64,
}

impl ColorFrame {
    pub fn new(image: ColorImage, sequence: u64) -> Self {
        Self { image, sequence }
    }
}

/// One push notification from a frame source.
#[derive(Clone, Debug)]
pub enum FrameEvent {
    Depth(DepthFrame),
    Color(ColorFrame),
}

impl FrameEvent {
    pub fn flip_horizontal(&mut self) {
        match self {
            FrameEvent::Depth(frame) => image::imageops::flip_horizontal_in_place(&mut frame.image),
            FrameEvent::Color(frame) => image::imageops::flip_horizontal_in_place(&mut frame.image),
        }
    }
}

/// Most recent depth and color frames.
#[derive(Clone, Debug, Default)]
pub struct LatestFrames {
    depth: Option<Arc<DepthFrame>>,
    color: Option<Arc<ColorFrame>>,
}

impl LatestFrames {
    pub fn set_depth(&mut self, frame: Arc<DepthFrame>) {
        self.depth = Some(frame);
    }

    pub fn set_color(&mut self, frame: Arc<ColorFrame>) {
        self.color = Some(frame);
    }

    /// Both frames, as needed for a calibration capture.
    pub fn pair(&self) -> Option<(Arc<DepthFrame>, Arc<ColorFrame>)> {
        Some((self.depth.clone()?, self.color.clone()?))
    }
}

/// Thread-safe latest-frame cache shared between the frame loop and calibration.
#[derive(Clone, Debug, Default)]
pub struct SharedFrames {
    inner: Arc<Mutex<LatestFrames>>,
}

impl SharedFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_depth(&self, frame: Arc<DepthFrame>) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame cache lock poisoned"))?;
        guard.set_depth(frame);
        Ok(())
    }

    pub fn store_color(&self, frame: Arc<ColorFrame>) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame cache lock poisoned"))?;
        guard.set_color(frame);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<LatestFrames> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame cache lock poisoned"))?;
        Ok(guard.clone())
    }
}
