use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::frame::{ColorImage, DepthImage};
use crate::zone::{IVec2, Zone, ZoneId};

/// Ordered collection of zones. Order is display-only.
///
/// Zones are addressed by `ZoneId`; the selection is an id, so removing or
/// inserting zones never leaves it pointing at the wrong entry.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
    next_id: u64,
    added: u64,
    selected: Option<ZoneId>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> ZoneId {
        self.next_id += 1;
        ZoneId::new(self.next_id)
    }

    /// Calibrate and append a new zone from the current frames.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        position: IVec2,
        size: IVec2,
        depth: &DepthImage,
        color: &ColorImage,
    ) -> ZoneId {
        let id = self.allocate_id();
        self.added += 1;
        self.zones
            .push(Zone::capture(id, name, position, size, depth, color));
        id
    }

    /// Append a zone reconstructed from persisted parts.
    pub(crate) fn restore(
        &mut self,
        name: impl Into<String>,
        position: IVec2,
        background: DepthImage,
        reference_color: ColorImage,
        usage_count: u32,
    ) -> ZoneId {
        let id = self.allocate_id();
        self.added += 1;
        self.zones.push(Zone::restore(
            id,
            name,
            position,
            background,
            reference_color,
            usage_count,
        ));
        id
    }

    /// Default label for the next added zone (`item0`, `item1`, ...).
    pub fn next_default_name(&self) -> String {
        let mut n = self.added;
        loop {
            let candidate = format!("item{}", n);
            if self.by_name(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn remove(&mut self, id: ZoneId) -> Option<Zone> {
        let idx = self.zones.iter().position(|zone| zone.id() == id)?;
        if self.selected == Some(id) {
            self.selected = None;
        }
        Some(self.zones.remove(idx))
    }

    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.id() == id)
    }

    pub fn get_mut(&mut self, id: ZoneId) -> Option<&mut Zone> {
        self.zones.iter_mut().find(|zone| zone.id() == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Zone> {
        self.zones.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn select(&mut self, id: ZoneId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(anyhow!("{} not in registry", id));
        }
        self.selected = Some(id);
        Ok(())
    }

    pub fn selected(&self) -> Option<&Zone> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Replace every zone with the contents of `other`, keeping ids unique.
    pub fn replace_with(&mut self, other: ZoneRegistry) {
        self.zones.clear();
        self.selected = None;
        for zone in other.zones {
            let id = self.allocate_id();
            self.added += 1;
            self.zones.push(zone.with_id(id));
        }
    }
}

/// The registry behind the single lock shared by detection, calibration and the store.
#[derive(Clone, Debug, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<ZoneRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: ZoneRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, ZoneRegistry>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("registry lock poisoned"))
    }
}
