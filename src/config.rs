use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorConfig;
use crate::ingest::SourceConfig;
use crate::notify::HttpNotifierConfig;

const DEFAULT_STORE_DIR: &str = "zones";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8798";
const DEFAULT_NOTIFY_QUEUE: usize = 64;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    store_dir: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    notify: Option<NotifyConfigFile>,
    api: Option<ApiConfigFile>,
    persistence: Option<PersistenceConfigFile>,
    logging: Option<LoggingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    color_width: Option<u32>,
    color_height: Option<u32>,
    depth_scale_mm: Option<f32>,
    flip_horizontal: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    pickup_ratio: Option<f32>,
    return_ratio: Option<f32>,
    pickup_threshold_mm: Option<f32>,
    return_threshold_mm: Option<f32>,
    max_diff_mm: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    timeout_ms: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    enabled: Option<bool>,
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PersistenceConfigFile {
    autosave_secs: Option<u64>,
    save_on_exit: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfigFile {
    file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub store_dir: PathBuf,
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub notify: NotifySettings,
    pub api: ApiSettings,
    /// Periodic save interval; `None` disables autosave.
    pub autosave: Option<Duration>,
    pub save_on_exit: bool,
    /// Append log records here instead of writing them to stderr.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub enabled: bool,
    pub http: HttpNotifierConfig,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub enabled: bool,
    pub addr: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// Load from `SHELFWATCH_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SHELFWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file path, then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let source_defaults = SourceConfig::default();
        let src = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: src.url.unwrap_or(source_defaults.url),
            target_fps: src.target_fps.unwrap_or(source_defaults.target_fps),
            width: src.width.unwrap_or(source_defaults.width),
            height: src.height.unwrap_or(source_defaults.height),
            color_width: src.color_width.unwrap_or(source_defaults.color_width),
            color_height: src.color_height.unwrap_or(source_defaults.color_height),
            depth_scale_mm: src.depth_scale_mm.unwrap_or(source_defaults.depth_scale_mm),
            flip_horizontal: src
                .flip_horizontal
                .unwrap_or(source_defaults.flip_horizontal),
        };

        let detector_defaults = DetectorConfig::default();
        let det = file.detector.unwrap_or_default();
        let detector = DetectorConfig {
            pickup_ratio: det.pickup_ratio.unwrap_or(detector_defaults.pickup_ratio),
            return_ratio: det.return_ratio.unwrap_or(detector_defaults.return_ratio),
            pickup_threshold_mm: det
                .pickup_threshold_mm
                .unwrap_or(detector_defaults.pickup_threshold_mm),
            return_threshold_mm: det
                .return_threshold_mm
                .unwrap_or(detector_defaults.return_threshold_mm),
            max_diff_mm: det.max_diff_mm.or(detector_defaults.max_diff_mm),
        };

        let http_defaults = HttpNotifierConfig::default();
        let notify = file.notify.unwrap_or_default();
        let notify = NotifySettings {
            enabled: notify.enabled.unwrap_or(true),
            http: HttpNotifierConfig {
                host: notify.host.unwrap_or(http_defaults.host),
                port: notify.port.unwrap_or(http_defaults.port),
                timeout: notify
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(http_defaults.timeout),
            },
            queue_capacity: notify.queue_capacity.unwrap_or(DEFAULT_NOTIFY_QUEUE),
        };

        let api = file.api.unwrap_or_default();
        let api = ApiSettings {
            enabled: api.enabled.unwrap_or(true),
            addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        };

        let persistence = file.persistence.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();
        Self {
            store_dir: file
                .store_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR)),
            source,
            detector,
            notify,
            api,
            autosave: autosave_interval(persistence.autosave_secs.unwrap_or(0)),
            save_on_exit: persistence.save_on_exit.unwrap_or(true),
            log_file: logging.file,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("SHELFWATCH_STORE_DIR") {
            if !dir.trim().is_empty() {
                self.store_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("SHELFWATCH_LOG_FILE") {
            self.log_file = if path.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Ok(url) = std::env::var("SHELFWATCH_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(addr) = std::env::var("SHELFWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api.addr = addr;
            }
        }
        if let Ok(host) = std::env::var("SHELFWATCH_NOTIFY_HOST") {
            if !host.trim().is_empty() {
                self.notify.http.host = host;
            }
        }
        if let Ok(port) = std::env::var("SHELFWATCH_NOTIFY_PORT") {
            self.notify.http.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHELFWATCH_NOTIFY_PORT must be a port number"))?;
        }
        if let Ok(enabled) = std::env::var("SHELFWATCH_NOTIFY_ENABLED") {
            self.notify.enabled = parse_bool(&enabled).ok_or_else(|| {
                anyhow!("SHELFWATCH_NOTIFY_ENABLED must be true/false, 1/0 or yes/no")
            })?;
        }
        if let Ok(ratio) = std::env::var("SHELFWATCH_PICKUP_RATIO") {
            self.detector.pickup_ratio = ratio
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHELFWATCH_PICKUP_RATIO must be a number"))?;
        }
        if let Ok(ratio) = std::env::var("SHELFWATCH_RETURN_RATIO") {
            self.detector.return_ratio = ratio
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHELFWATCH_RETURN_RATIO must be a number"))?;
        }
        if let Ok(secs) = std::env::var("SHELFWATCH_AUTOSAVE_SECS") {
            let seconds: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("SHELFWATCH_AUTOSAVE_SECS must be an integer number of seconds")
            })?;
            self.autosave = autosave_interval(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.validate()?;

        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.source.width == 0
            || self.source.height == 0
            || self.source.color_width == 0
            || self.source.color_height == 0
        {
            return Err(anyhow!("source frame dimensions must be non-zero"));
        }
        if !(self.source.depth_scale_mm.is_finite() && self.source.depth_scale_mm > 0.0) {
            return Err(anyhow!("source depth_scale_mm must be a positive number"));
        }
        if self.notify.queue_capacity == 0 {
            return Err(anyhow!("notify queue_capacity must be greater than zero"));
        }
        if self.notify.enabled && self.notify.http.host.trim().is_empty() {
            return Err(anyhow!("notify host must not be empty"));
        }
        if self.api.enabled {
            self.api
                .addr
                .parse::<SocketAddr>()
                .map_err(|_| anyhow!("api addr '{}' is not host:port", self.api.addr))?;
        }
        Ok(())
    }
}

fn autosave_interval(seconds: u64) -> Option<Duration> {
    if seconds == 0 {
        None
    } else {
        Some(Duration::from_secs(seconds))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.store_dir, PathBuf::from("zones"));
        assert_eq!(cfg.source.url, "stub://shelf");
        assert_eq!(cfg.api.addr, "127.0.0.1:8798");
        assert_eq!(cfg.notify.queue_capacity, 64);
        assert!(cfg.notify.enabled);
        assert!(cfg.autosave.is_none());
        assert!(cfg.save_on_exit);
        assert!(cfg.detector.max_diff_mm.is_none());
        assert!(cfg.log_file.is_none());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn validate_rejects_out_of_range_ratio() {
        let mut cfg = MonitorConfig::default();
        cfg.detector.pickup_ratio = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_api_addr() {
        let mut cfg = MonitorConfig::default();
        cfg.api.addr = "localhost".to_string();
        assert!(cfg.validate().is_err());
        cfg.api.enabled = false;
        assert!(cfg.validate().is_ok());
    }
}
