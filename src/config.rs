use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::handlers::HandlerCatalog;
use crate::orchestration::builder::{OrchestratorBuilder, OrchestratorConfig};
use crate::orchestration::registry::RoutingPolicy;
use crate::orchestration::worker::WorkerDescriptor;
use crate::{Error, Result};

/// One `[[workers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    pub capabilities: Vec<String>,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Name of a handler in the catalog.
    pub handler: String,
}

fn default_concurrency_limit() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub routing: RoutingPolicy,
    pub run_timeout_secs: Option<u64>,
    pub log_file: Option<String>,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

impl Config {
    pub fn taskweave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskweave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskweave_dir()?.join("taskweave.toml"))
    }

    /// Load the default config file, or defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load an explicit config file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        if config.run_timeout_secs == Some(0) {
            return Err(Error::Config(format!(
                "{}: run_timeout_secs must be at least 1",
                path.display()
            )));
        }
        debug!(
            path = %path.display(),
            workers = config.workers.len(),
            routing = %config.routing,
            "config loaded"
        );
        Ok(config)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file.as_deref().map(expand_tilde)
    }

    /// Resolve worker handlers and assemble a builder.
    ///
    /// Worker validation itself happens at build time.
    pub fn into_builder(self, catalog: &HandlerCatalog) -> Result<OrchestratorBuilder> {
        let run_timeout = self.run_timeout();
        let workers = self
            .workers
            .into_iter()
            .map(|w| {
                let handler = catalog
                    .get(&w.handler)
                    .ok_or_else(|| Error::UnknownHandler(w.handler.clone()))?;
                Ok(
                    WorkerDescriptor::with_shared_handler(w.name, w.capabilities, handler)
                        .with_concurrency_limit(w.concurrency_limit),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OrchestratorBuilder::from_config(OrchestratorConfig {
            workers,
            routing: self.routing,
            run_timeout,
        }))
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
