//! zonectl - offline zone registry editor
//!
//! Edits the persisted registry directly. Capture operations grab one depth +
//! color pair from the configured frame source, so the daemon should not be
//! holding the device at the same time.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shelfwatch::ingest::grab_pair;
use shelfwatch::zone::{DEFAULT_ZONE_POSITION, DEFAULT_ZONE_SIZE};
use shelfwatch::{
    open_source, ColorFrame, DepthFrame, IVec2, MonitorConfig, RegistryStore, ZoneId, ZoneRegistry,
};

const MAX_GRAB_EVENTS: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "zonectl", version, about = "Edit the shelfwatch zone registry")]
struct Args {
    /// Config file (TOML when the extension is .toml, JSON otherwise).
    #[arg(long, env = "SHELFWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory; overrides the configured one.
    #[arg(long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List zones with geometry and usage counts
    List,

    /// Calibrate a new zone from the current frames
    Add {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_hyphen_values = true, default_value_t = DEFAULT_ZONE_POSITION.x)]
        x: i32,
        #[arg(long, allow_hyphen_values = true, default_value_t = DEFAULT_ZONE_POSITION.y)]
        y: i32,
        #[arg(long, default_value_t = DEFAULT_ZONE_SIZE.x)]
        w: i32,
        #[arg(long, default_value_t = DEFAULT_ZONE_SIZE.y)]
        h: i32,
    },

    /// Delete a zone
    Remove { zone: String },

    /// Move and/or resize a zone, then recapture it
    Move {
        zone: String,
        #[arg(long, allow_hyphen_values = true)]
        x: Option<i32>,
        #[arg(long, allow_hyphen_values = true)]
        y: Option<i32>,
        #[arg(long)]
        w: Option<i32>,
        #[arg(long)]
        h: Option<i32>,
    },

    /// Change a zone's label
    Rename { zone: String, name: String },

    /// Retake the background snapshot, keeping state and usage count
    Recapture { zone: String },

    /// Retake the background snapshot and reset the usage count
    Refresh { zone: String },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = MonitorConfig::load_from(args.config.as_deref())?;
    shelfwatch::logging::init(cfg.log_file.as_deref())?;
    let store = RegistryStore::new(args.store.unwrap_or_else(|| cfg.store_dir.clone()));
    let mut registry = store.load()?.registry;

    match args.command {
        Command::List => {
            print_zones(&registry);
            return Ok(());
        }
        Command::Add { name, x, y, w, h } => {
            let name = name.unwrap_or_else(|| registry.next_default_name());
            if registry.by_name(&name).is_some() {
                return Err(anyhow!("zone '{}' already exists", name));
            }
            let (depth, color) = grab(&cfg)?;
            let id = registry.add(
                name,
                IVec2::new(x, y),
                IVec2::new(w, h),
                &depth.image,
                &color.image,
            );
            describe(&registry, id);
        }
        Command::Remove { zone } => {
            let id = find(&registry, &zone)?;
            registry.remove(id);
            println!("removed {}", zone);
        }
        Command::Move { zone, x, y, w, h } => {
            let id = find(&registry, &zone)?;
            let (depth, color) = grab(&cfg)?;
            let target = registry
                .get_mut(id)
                .ok_or_else(|| anyhow!("zone '{}' not found", zone))?;
            let position = target.position();
            let size = target.size();
            target.reposition(
                IVec2::new(x.unwrap_or(position.x), y.unwrap_or(position.y)),
                IVec2::new(w.unwrap_or(size.x), h.unwrap_or(size.y)),
                &depth.image,
                &color.image,
            );
            describe(&registry, id);
        }
        Command::Rename { zone, name } => {
            let id = find(&registry, &zone)?;
            if registry.by_name(&name).is_some_and(|other| other.id() != id) {
                return Err(anyhow!("zone '{}' already exists", name));
            }
            if let Some(target) = registry.get_mut(id) {
                target.rename(name);
            }
            describe(&registry, id);
        }
        Command::Recapture { zone } => {
            let id = find(&registry, &zone)?;
            let (depth, color) = grab(&cfg)?;
            if let Some(target) = registry.get_mut(id) {
                target.recapture(&depth.image, &color.image);
            }
            describe(&registry, id);
        }
        Command::Refresh { zone } => {
            let id = find(&registry, &zone)?;
            let (depth, color) = grab(&cfg)?;
            if let Some(target) = registry.get_mut(id) {
                target.refresh(&depth.image, &color.image);
            }
            describe(&registry, id);
        }
    }

    store.save(&registry)?;
    Ok(())
}

fn grab(cfg: &MonitorConfig) -> Result<(DepthFrame, ColorFrame)> {
    let mut source = open_source(&cfg.source)?;
    source.connect()?;
    grab_pair(source.as_mut(), MAX_GRAB_EVENTS, cfg.source.flip_horizontal)
}

fn find(registry: &ZoneRegistry, name: &str) -> Result<ZoneId> {
    registry
        .by_name(name)
        .map(|zone| zone.id())
        .ok_or_else(|| anyhow!("zone '{}' not found", name))
}

fn describe(registry: &ZoneRegistry, id: ZoneId) {
    if let Some(zone) = registry.get(id) {
        println!(
            "{}  pos={} size={} usage_count={}",
            zone.name(),
            zone.position(),
            zone.size(),
            zone.usage_count()
        );
    }
}

fn print_zones(registry: &ZoneRegistry) {
    if registry.is_empty() {
        println!("no zones");
        return;
    }
    for zone in registry.iter() {
        describe(registry, zone.id());
    }
}
