//! Zone registry persistence.
//!
//! A store is a directory holding `zones.json` (one record per zone) plus two
//! PNG side-files per calibrated zone: the 16-bit background depth snapshot
//! and the RGB reference crop. Loading is record-by-record; a record whose
//! side-files are missing, unreadable or disagree with the stored geometry is
//! skipped with a warning and the rest still load.

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::frame::ColorImage;
use crate::ingest::replay::load_depth_png;
use crate::registry::ZoneRegistry;
use crate::zone::{IVec2, Zone};

pub const INDEX_FILE: &str = "zones.json";

/// One persisted zone, in index-file form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub name: String,
    #[serde(rename = "depthImagePath", default)]
    pub depth_image_path: String,
    #[serde(rename = "colorImagePath", default)]
    pub color_image_path: String,
    pub pos_x: i32,
    pub pos_y: i32,
    pub size_x: i32,
    pub size_y: i32,
    #[serde(rename = "usageCount")]
    pub usage_count: u32,
}

/// A record that did not make it into the loaded registry.
#[derive(Clone, Debug)]
pub struct SkippedRecord {
    /// Zero-based position in the index.
    pub index: usize,
    pub name: Option<String>,
    pub reason: String,
}

#[derive(Debug)]
pub struct LoadReport {
    pub registry: ZoneRegistry,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Clone, Debug)]
pub struct RegistryStore {
    dir: PathBuf,
}

impl RegistryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Write side-files and the index. Returns the number of records written.
    ///
    /// Side-files already written stay on disk if a later write fails. A zone
    /// without a background is indexed with empty paths and is skipped by
    /// `load`, since a zone cannot be evaluated without one.
    pub fn save(&self, registry: &ZoneRegistry) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create store directory {}", self.dir.display()))?;

        let mut used = HashSet::new();
        let mut records = Vec::with_capacity(registry.len());
        for zone in registry.iter() {
            records.push(self.save_zone(zone, &mut used)?);
        }

        let json = serde_json::to_vec_pretty(&records)?;
        let index = self.index_path();
        let tmp = index.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &index)
            .with_context(|| format!("replace {}", index.display()))?;
        log::info!("saved {} zones to {}", records.len(), index.display());
        Ok(records.len())
    }

    fn save_zone(&self, zone: &Zone, used: &mut HashSet<String>) -> Result<ZoneRecord> {
        let position = zone.position();
        let size = zone.size();
        let mut record = ZoneRecord {
            name: zone.name().to_string(),
            depth_image_path: String::new(),
            color_image_path: String::new(),
            pos_x: position.x,
            pos_y: position.y,
            size_x: size.x,
            size_y: size.y,
            usage_count: zone.usage_count(),
        };
        if !zone.has_background() {
            return Ok(record);
        }

        let stem = unique_stem(zone, used);
        let depth_file = format!("{}_depth.png", stem);
        zone.background()
            .save_with_format(self.dir.join(&depth_file), ImageFormat::Png)
            .with_context(|| format!("write depth snapshot for {}", zone.name()))?;
        record.depth_image_path = depth_file;

        let color = zone.reference_color();
        if color.width() > 0 && color.height() > 0 {
            let color_file = format!("{}_color.png", stem);
            color
                .save_with_format(self.dir.join(&color_file), ImageFormat::Png)
                .with_context(|| format!("write color snapshot for {}", zone.name()))?;
            record.color_image_path = color_file;
        }
        Ok(record)
    }

    /// Load the registry. A missing index yields an empty registry.
    pub fn load(&self) -> Result<LoadReport> {
        let index = self.index_path();
        if !index.exists() {
            log::info!("no zone index at {}; starting empty", index.display());
            return Ok(LoadReport {
                registry: ZoneRegistry::new(),
                skipped: Vec::new(),
            });
        }
        let raw = std::fs::read(&index).with_context(|| format!("read {}", index.display()))?;
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&raw)
            .map_err(|e| anyhow!("zone index {} is not a record list: {}", index.display(), e))?;

        let mut registry = ZoneRegistry::new();
        let mut skipped = Vec::new();
        for (idx, entry) in entries.into_iter().enumerate() {
            let name = entry
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let outcome = serde_json::from_value::<ZoneRecord>(entry)
                .map_err(|e| anyhow!("malformed record: {}", e))
                .and_then(|record| self.load_record(&record, &mut registry));
            if let Err(err) = outcome {
                log::warn!(
                    "skipping zone record {} ({}): {:#}",
                    idx,
                    name.as_deref().unwrap_or("unnamed"),
                    err
                );
                skipped.push(SkippedRecord {
                    index: idx,
                    name,
                    reason: format!("{:#}", err),
                });
            }
        }
        log::info!(
            "loaded {} zones from {} ({} skipped)",
            registry.len(),
            index.display(),
            skipped.len()
        );
        Ok(LoadReport { registry, skipped })
    }

    fn load_record(&self, record: &ZoneRecord, registry: &mut ZoneRegistry) -> Result<()> {
        if record.depth_image_path.is_empty() {
            return Err(anyhow!("record has no depth snapshot"));
        }
        if record.pos_x < 0 || record.pos_y < 0 {
            return Err(anyhow!(
                "negative position ({}, {})",
                record.pos_x,
                record.pos_y
            ));
        }
        let background = load_depth_png(&self.resolve(&record.depth_image_path))?;
        let (w, h) = background.dimensions();
        if w == 0 || h == 0 {
            return Err(anyhow!("depth snapshot is empty"));
        }
        if (record.size_x, record.size_y) != (w as i32, h as i32) {
            return Err(anyhow!(
                "stored size {}x{} does not match depth snapshot {}x{}",
                record.size_x,
                record.size_y,
                w,
                h
            ));
        }
        let color = if record.color_image_path.is_empty() {
            ColorImage::new(0, 0)
        } else {
            let path = self.resolve(&record.color_image_path);
            image::open(&path)
                .with_context(|| format!("decode color snapshot {}", path.display()))?
                .into_rgb8()
        };
        registry.restore(
            record.name.clone(),
            IVec2::new(record.pos_x, record.pos_y),
            background,
            color,
            record.usage_count,
        );
        Ok(())
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }
}

/// Side-file stem not yet claimed in this save: the sanitized name, then
/// `{stem}_{id}`, then `{stem}_{id}_{n}`.
fn unique_stem(zone: &Zone, used: &mut HashSet<String>) -> String {
    let base = sanitize_file_stem(zone.name());
    if used.insert(base.clone()) {
        return base;
    }
    let with_id = format!("{}_{}", base, zone.id().get());
    if used.insert(with_id.clone()) {
        return with_id;
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{}_{}", with_id, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// File-system-safe stem for a zone name.
///
/// - Converts to lowercase
/// - Replaces anything but ASCII alphanumerics, '_' and '-' with '_'
/// - Limits length to 64 characters
pub fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if stem.is_empty() {
        "zone".to_string()
    } else {
        stem
    }
}
