//! shelfwatchd - shelf occupancy daemon
//!
//! This daemon:
//! 1. Loads configuration and the persisted zone registry
//! 2. Subscribes to the configured depth source (startup failure is fatal)
//! 3. Evaluates every depth frame against the calibrated zones
//! 4. Queues pickup/return notifications for the dispatcher thread
//! 5. Serves the calibration control API
//! 6. Autosaves when configured, and saves on Ctrl-C when configured

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use shelfwatch::api::{ApiConfig, ApiServer, ControlContext};
use shelfwatch::ingest::Delivery;
use shelfwatch::{
    open_source, subscribe, Dispatcher, FrameEvent, HttpNotifier, LogNotifier, MonitorConfig,
    Notifier, OccupancyDetector, RegistryStore, SharedFrames, SharedRegistry,
};

const FRAME_QUEUE: usize = 4;
const RECV_TIMEOUT: Duration = Duration::from_millis(200);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about = "Depth-camera shelf occupancy daemon")]
struct Args {
    /// Config file (TOML when the extension is .toml, JSON otherwise).
    #[arg(long, env = "SHELFWATCH_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = MonitorConfig::load_from(args.config.as_deref())?;
    shelfwatch::logging::init(cfg.log_file.as_deref())?;

    let store = RegistryStore::new(&cfg.store_dir);
    let report = store.load()?;
    if !report.skipped.is_empty() {
        log::warn!(
            "{} zone records could not be restored from {}",
            report.skipped.len(),
            store.index_path().display()
        );
    }
    let registry = SharedRegistry::new(report.registry);
    let frames = SharedFrames::new();

    let source = open_source(&cfg.source)?;
    let subscription = subscribe(source, FRAME_QUEUE, cfg.source.flip_horizontal)?;
    log::info!(
        "frame source connected: {} ({} mm per depth unit)",
        cfg.source.url,
        subscription.depth_to_mm_scale()
    );

    let detector = OccupancyDetector::new(cfg.detector)?;

    let notifier: Box<dyn Notifier> = if cfg.notify.enabled {
        log::info!(
            "notifications to http://{}:{}",
            cfg.notify.http.host,
            cfg.notify.http.port
        );
        Box::new(HttpNotifier::new(&cfg.notify.http)?)
    } else {
        log::info!("notifications disabled; transitions are logged only");
        Box::new(LogNotifier)
    };
    let dispatcher = Dispatcher::spawn(notifier, cfg.notify.queue_capacity);

    let api_handle = if cfg.api.enabled {
        let ctx = ControlContext {
            registry: registry.clone(),
            frames: frames.clone(),
            store: store.clone(),
        };
        let api_config = ApiConfig {
            addr: cfg.api.addr.clone(),
        };
        Some(ApiServer::new(api_config, ctx).spawn()?)
    } else {
        None
    };

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!(
        "shelfwatchd running. store={} zones={}",
        cfg.store_dir.display(),
        registry.lock()?.len()
    );

    let mut last_save = Instant::now();
    let mut last_health_log = Instant::now();
    let mut transitions = 0u64;

    loop {
        if rx.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break;
        }

        match subscription.recv_timeout(RECV_TIMEOUT) {
            Delivery::Frame(FrameEvent::Depth(frame)) => {
                let frame = Arc::new(frame);
                frames.store_depth(frame.clone())?;
                let events = {
                    let mut guard = registry.lock()?;
                    detector.evaluate(&mut guard, &frame)
                };
                for event in events {
                    transitions += 1;
                    dispatcher.dispatch(event);
                }
            }
            Delivery::Frame(FrameEvent::Color(frame)) => {
                frames.store_color(Arc::new(frame))?;
            }
            Delivery::Idle => {}
            Delivery::Closed => {
                log::warn!("frame stream closed; stopping");
                break;
            }
        }

        if let Some(interval) = cfg.autosave {
            if last_save.elapsed() >= interval {
                save_registry(&store, &registry);
                last_save = Instant::now();
            }
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::info!(
                "zones={} transitions={} source_healthy={}",
                registry.lock()?.len(),
                transitions,
                subscription.is_healthy()
            );
            last_health_log = Instant::now();
        }
    }

    subscription.stop()?;
    if let Some(handle) = api_handle {
        handle.stop()?;
    }
    if cfg.save_on_exit {
        save_registry(&store, &registry);
    }
    dispatcher.shutdown();
    Ok(())
}

fn save_registry(store: &RegistryStore, registry: &SharedRegistry) {
    let result = registry
        .lock()
        .and_then(|guard| store.save(&guard));
    if let Err(err) = result {
        log::error!("saving zones to {} failed: {:#}", store.dir().display(), err);
    }
}
