//! Calibrated shelf zones.
//!
//! A `Zone` is a rectangle in depth-frame coordinates together with the depth
//! snapshot it is compared against. Geometry edits always clamp to the frame
//! and recapture the snapshot, so `background` dimensions track `size`.

use image::imageops;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::frame::{ColorImage, DepthImage};

/// Default geometry for a freshly added zone (depth-frame pixels).
pub const DEFAULT_ZONE_POSITION: IVec2 = IVec2 { x: 100, y: 100 };
pub const DEFAULT_ZONE_SIZE: IVec2 = IVec2 { x: 50, y: 50 };

/// Integer 2D vector used for zone position and extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IVec2 {
    pub x: i32,
    pub y: i32,
}

impl IVec2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for IVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Stable zone identity. Assigned by the registry, never reused within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(u64);

impl ZoneId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone#{}", self.0)
    }
}

impl std::str::FromStr for ZoneId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("zone#").unwrap_or(s);
        raw.parse().map(Self)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneState {
    #[default]
    Vacant,
    InUse,
}

impl ZoneState {
    pub fn flipped(self) -> Self {
        match self {
            ZoneState::Vacant => ZoneState::InUse,
            ZoneState::InUse => ZoneState::Vacant,
        }
    }
}

/// Per-pixel signed live-minus-background difference from the last evaluation.
///
/// Display only; never feeds back into a decision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticMask {
    width: u32,
    height: u32,
    values: Vec<i8>,
}

impl DiagnosticMask {
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0; width as usize * height as usize],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> Option<i8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub(crate) fn set(&mut self, x: u32, y: u32, value: i8) {
        let idx = y as usize * self.width as usize + x as usize;
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = value;
        }
    }
}

/// Clamp a zone rectangle into a `width` x `height` frame.
///
/// Size is clamped first to `[1, dim]`, then position to `[0, dim - size]`.
pub fn clamp_to_frame(position: IVec2, size: IVec2, width: u32, height: u32) -> (IVec2, IVec2) {
    let (sx, px) = clamp_axis(position.x, size.x, width);
    let (sy, py) = clamp_axis(position.y, size.y, height);
    (IVec2::new(px, py), IVec2::new(sx, sy))
}

fn clamp_axis(pos: i32, size: i32, dim: u32) -> (i32, i32) {
    let dim = i32::try_from(dim).unwrap_or(i32::MAX).max(1);
    let size = size.clamp(1, dim);
    let pos = pos.clamp(0, dim - size);
    (size, pos)
}

/// Map a depth-frame rectangle into color-frame pixels `(x, y, w, h)`.
pub fn scale_to_color(
    position: IVec2,
    size: IVec2,
    depth_dims: (u32, u32),
    color_dims: (u32, u32),
) -> (u32, u32, u32, u32) {
    if depth_dims.0 == 0 || depth_dims.1 == 0 {
        return (0, 0, 0, 0);
    }
    let sx = color_dims.0 as f32 / depth_dims.0 as f32;
    let sy = color_dims.1 as f32 / depth_dims.1 as f32;
    let x1 = (position.x as f32 * sx).round().max(0.0) as u32;
    let y1 = (position.y as f32 * sy).round().max(0.0) as u32;
    let x2 = ((position.x + size.x) as f32 * sx).round().max(0.0) as u32;
    let y2 = ((position.y + size.y) as f32 * sy).round().max(0.0) as u32;
    let x1 = x1.min(color_dims.0);
    let y1 = y1.min(color_dims.1);
    let x2 = x2.min(color_dims.0);
    let y2 = y2.min(color_dims.1);
    (x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
}

/// A calibrated region of the depth frame tracking one monitored slot.
#[derive(Clone, Debug)]
pub struct Zone {
    id: ZoneId,
    name: String,
    position: IVec2,
    size: IVec2,
    background: DepthImage,
    reference_color: ColorImage,
    state: ZoneState,
    usage_count: u32,
    mask: DiagnosticMask,
}

impl Zone {
    /// Calibrate a new zone against the given frames.
    pub(crate) fn capture(
        id: ZoneId,
        name: impl Into<String>,
        position: IVec2,
        size: IVec2,
        depth: &DepthImage,
        color: &ColorImage,
    ) -> Self {
        let (position, size) = clamp_to_frame(position, size, depth.width(), depth.height());
        let mut zone = Self {
            id,
            name: name.into(),
            position,
            size,
            background: DepthImage::new(0, 0),
            reference_color: ColorImage::new(0, 0),
            state: ZoneState::Vacant,
            usage_count: 0,
            mask: DiagnosticMask::default(),
        };
        zone.recapture(depth, color);
        zone
    }

    /// Rebuild a zone from persisted parts. `size` follows the background.
    pub(crate) fn restore(
        id: ZoneId,
        name: impl Into<String>,
        position: IVec2,
        background: DepthImage,
        reference_color: ColorImage,
        usage_count: u32,
    ) -> Self {
        let (w, h) = background.dimensions();
        Self {
            id,
            name: name.into(),
            position,
            size: IVec2::new(w as i32, h as i32),
            background,
            reference_color,
            state: ZoneState::Vacant,
            usage_count,
            mask: DiagnosticMask::zeroed(w, h),
        }
    }

    pub(crate) fn with_id(mut self, id: ZoneId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> IVec2 {
        self.position
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn area(&self) -> u64 {
        self.size.x.max(0) as u64 * self.size.y.max(0) as u64
    }

    pub fn background(&self) -> &DepthImage {
        &self.background
    }

    pub fn reference_color(&self) -> &ColorImage {
        &self.reference_color
    }

    pub fn state(&self) -> ZoneState {
        self.state
    }

    pub fn usage_count(&self) -> u32 {
        self.usage_count
    }

    pub fn diagnostic_mask(&self) -> &DiagnosticMask {
        &self.mask
    }

    pub(crate) fn diagnostic_mask_mut(&mut self) -> &mut DiagnosticMask {
        &mut self.mask
    }

    pub fn has_background(&self) -> bool {
        self.background.width() > 0 && self.background.height() > 0
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Overwrite both snapshots at the current geometry. State and count are kept.
    pub fn recapture(&mut self, depth: &DepthImage, color: &ColorImage) {
        let (x, y, w, h) = self.depth_rect();
        self.background = imageops::crop_imm(depth, x, y, w, h).to_image();
        let (cx, cy, cw, ch) = scale_to_color(
            self.position,
            self.size,
            depth.dimensions(),
            color.dimensions(),
        );
        self.reference_color = imageops::crop_imm(color, cx, cy, cw, ch).to_image();
        let (bw, bh) = self.background.dimensions();
        self.mask = DiagnosticMask::zeroed(bw, bh);
    }

    /// Recapture and start counting from scratch.
    pub fn refresh(&mut self, depth: &DepthImage, color: &ColorImage) {
        self.recapture(depth, color);
        self.state = ZoneState::Vacant;
        self.usage_count = 0;
    }

    /// Move and/or resize, clamped to the depth frame, then recapture.
    pub fn reposition(
        &mut self,
        position: IVec2,
        size: IVec2,
        depth: &DepthImage,
        color: &ColorImage,
    ) {
        let (position, size) = clamp_to_frame(position, size, depth.width(), depth.height());
        self.position = position;
        self.size = size;
        self.recapture(depth, color);
    }

    /// Commit a state flip. Returns the new state.
    pub(crate) fn flip_state(&mut self) -> ZoneState {
        self.state = self.state.flipped();
        if self.state == ZoneState::InUse {
            self.usage_count = self.usage_count.saturating_add(1);
        }
        self.state
    }

    /// `(x, y, w, h)` in depth pixels; geometry is non-negative after clamping.
    pub fn depth_rect(&self) -> (u32, u32, u32, u32) {
        (
            self.position.x.max(0) as u32,
            self.position.y.max(0) as u32,
            self.size.x.max(0) as u32,
            self.size.y.max(0) as u32,
        )
    }
}
