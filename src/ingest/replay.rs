//! Recorded frame replay.
//!
//! Plays back `NNNN_depth.png` files (16-bit grayscale) from a local
//! directory in name order, each followed by its `NNNN_color.png` when one
//! exists. The sequence loops when `looping` is set.
//!
//! The replay source MUST NOT:
//! - Fetch remote URLs
//! - Accept 8-bit depth images (the dynamic range would be silently lost)

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{frame_interval, FrameSource, SourceConfig, SourceStats};
use crate::frame::{ColorFrame, DepthFrame, DepthImage, FrameEvent};

const DEPTH_SUFFIX: &str = "_depth.png";
const COLOR_SUFFIX: &str = "_color.png";

#[derive(Clone, Debug)]
struct RecordedFrame {
    depth: PathBuf,
    color: Option<PathBuf>,
}

pub struct ReplaySource {
    dir: PathBuf,
    config: SourceConfig,
    looping: bool,
    frames: Vec<RecordedFrame>,
    cursor: usize,
    depth_count: u64,
    color_count: u64,
    pending: VecDeque<FrameEvent>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl ReplaySource {
    pub fn new(dir: impl AsRef<Path>, config: SourceConfig) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("replay source needs a directory path"));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            looping: true,
            frames: Vec::new(),
            cursor: 0,
            depth_count: 0,
            color_count: 0,
            pending: VecDeque::new(),
            last_frame_at: None,
            last_error: None,
        })
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    fn scan(&self) -> Result<Vec<RecordedFrame>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("read replay directory {}", self.dir.display()))?;
        let mut depth_files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_depth = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(DEPTH_SUFFIX));
            if is_depth {
                depth_files.push(path);
            }
        }
        depth_files.sort();
        Ok(depth_files
            .into_iter()
            .map(|depth| {
                let color = color_companion(&depth).filter(|path| path.is_file());
                RecordedFrame { depth, color }
            })
            .collect())
    }

    fn load_next(&mut self) -> Result<Option<()>> {
        if self.cursor >= self.frames.len() {
            if !self.looping || self.frames.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let recorded = self.frames[self.cursor].clone();
        self.cursor += 1;

        let depth = load_depth_png(&recorded.depth)?;
        self.depth_count += 1;
        self.pending.push_back(FrameEvent::Depth(DepthFrame::new(
            depth,
            self.config.depth_scale_mm,
            self.depth_count,
        )));
        if let Some(path) = &recorded.color {
            let color = image::open(path)
                .with_context(|| format!("decode color frame {}", path.display()))?
                .into_rgb8();
            self.color_count += 1;
            self.pending
                .push_back(FrameEvent::Color(ColorFrame::new(color, self.color_count)));
        }
        Ok(Some(()))
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

impl FrameSource for ReplaySource {
    fn connect(&mut self) -> Result<()> {
        let frames = self.scan()?;
        if frames.is_empty() {
            return Err(anyhow!(
                "replay directory {} has no *{} files",
                self.dir.display(),
                DEPTH_SUFFIX
            ));
        }
        // Validate the first frame up front so a bad recording fails at startup.
        load_depth_png(&frames[0].depth)?;
        log::info!(
            "ReplaySource: {} frames from {} (looping={})",
            frames.len(),
            self.dir.display(),
            self.looping
        );
        self.frames = frames;
        self.cursor = 0;
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<FrameEvent>> {
        if self.frames.is_empty() {
            return Err(anyhow!("replay source not connected; call connect() first"));
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.pace();
        match self.load_next() {
            Ok(Some(())) => Ok(self.pending.pop_front()),
            Ok(None) => Ok(None),
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn depth_to_mm_scale(&self) -> f32 {
        self.config.depth_scale_mm
    }

    fn is_healthy(&self) -> bool {
        !self.frames.is_empty() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            depth_frames: self.depth_count,
            color_frames: self.color_count,
            source: self.dir.display().to_string(),
        }
    }
}

fn color_companion(depth: &Path) -> Option<PathBuf> {
    let name = depth.file_name()?.to_str()?;
    let stem = name.strip_suffix(DEPTH_SUFFIX)?;
    Some(depth.with_file_name(format!("{}{}", stem, COLOR_SUFFIX)))
}

/// Decode a 16-bit grayscale PNG. Other pixel formats are rejected.
pub(crate) fn load_depth_png(path: &Path) -> Result<DepthImage> {
    let decoded = image::open(path).with_context(|| format!("decode depth frame {}", path.display()))?;
    match decoded {
        DynamicImage::ImageLuma16(image) => Ok(image),
        other => Err(anyhow!(
            "{} is {:?}, expected 16-bit grayscale",
            path.display(),
            other.color()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn config() -> SourceConfig {
        SourceConfig {
            target_fps: 0,
            depth_scale_mm: 0.5,
            ..SourceConfig::default()
        }
    }

    fn write_depth(dir: &Path, name: &str, value: u16) {
        DepthImage::from_pixel(6, 4, Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn replays_depth_with_color_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_depth(dir.path(), "0002_depth.png", 2000);
        write_depth(dir.path(), "0001_depth.png", 1000);
        RgbImage::from_pixel(12, 8, Rgb([1, 2, 3]))
            .save(dir.path().join("0001_color.png"))
            .unwrap();

        let mut source = ReplaySource::new(dir.path(), config()).unwrap().with_looping(false);
        assert!(!source.is_healthy());
        source.connect().unwrap();
        assert!(source.is_healthy());
        assert_eq!(source.depth_to_mm_scale(), 0.5);

        let Some(FrameEvent::Depth(first)) = source.next_event().unwrap() else {
            panic!("expected depth frame");
        };
        assert_eq!(first.sample(0, 0), 1000);
        assert_eq!(first.mm_per_unit, 0.5);
        assert!(matches!(source.next_event().unwrap(), Some(FrameEvent::Color(_))));
        let Some(FrameEvent::Depth(second)) = source.next_event().unwrap() else {
            panic!("expected depth frame");
        };
        assert_eq!(second.sample(0, 0), 2000);
        assert!(source.next_event().unwrap().is_none());
        assert_eq!(source.stats().depth_frames, 2);
    }

    #[test]
    fn loops_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        write_depth(dir.path(), "a_depth.png", 10);
        let mut source = ReplaySource::new(dir.path(), config()).unwrap();
        source.connect().unwrap();
        for _ in 0..3 {
            assert!(matches!(source.next_event().unwrap(), Some(FrameEvent::Depth(_))));
        }
    }

    #[test]
    fn empty_directory_fails_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ReplaySource::new(dir.path(), config()).unwrap();
        assert!(source.connect().is_err());
    }

    #[test]
    fn eight_bit_depth_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 4, Luma([9]))
            .save(dir.path().join("x_depth.png"))
            .unwrap();
        let mut source = ReplaySource::new(dir.path(), config()).unwrap();
        let err = source.connect().unwrap_err();
        assert!(err.to_string().contains("16-bit"));
    }
}
