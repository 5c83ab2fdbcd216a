//! Process logger setup for the binaries.

use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::path::Path;

/// Install the `env_logger` backend, filtered by `RUST_LOG` (default `info`).
///
/// With `log_file` set, records are appended to that file instead of stderr.
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder
        .try_init()
        .map_err(|e| anyhow!("logger already initialized: {}", e))
}
