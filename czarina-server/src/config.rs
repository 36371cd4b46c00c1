//! Configuration management for the orchestrator
//!
//! A project lives in a directory (by default `.czarina/` at the repository
//! root) holding `config.json`, the `logs/` directory and optional agent
//! profiles. Settings are layered: built-in defaults, then the JSON file,
//! then `CZARINA_*` environment variables using `__` between nested keys
//! (`CZARINA_DAEMON__AUTO_APPROVE=false`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use czarina_core::orchestration::settings::MAX_IDLE_THRESHOLD_SECS;
use czarina_core::orchestration::{ControllerSettings, DaemonSettings, WorkerSet};
use czarina_core::profile::ProfileRegistry;
use czarina_core::worker::Worker;

use crate::{Error, Result};

pub const DEFAULT_PROJECT_DIR: &str = ".czarina";
pub const CONFIG_FILE: &str = "config.json";
pub const ENV_PREFIX: &str = "CZARINA";

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,
    #[serde(default)]
    pub workers: Vec<Worker>,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,
    #[serde(default = "default_worktrees_dir")]
    pub worktrees_dir: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Absolute directory the configuration was loaded from
    #[serde(skip)]
    pub project_dir: PathBuf,
}

/// Project identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Short name used for the tmux session; derived from `name` if empty
    #[serde(default)]
    pub slug: String,
    /// Git repository the workers branch from; defaults to the parent of
    /// the project directory
    #[serde(default)]
    pub repository: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from("agents/profiles")
}

fn default_worktrees_dir() -> PathBuf {
    PathBuf::from("worktrees")
}

impl Config {
    /// Load `config.json` from a project directory
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_from_file(project_dir, &project_dir.join(CONFIG_FILE))
    }

    /// Load an explicit configuration file for a project directory
    pub fn load_from_file(project_dir: &Path, path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .set_default("controller.tick_interval_secs", 15)?
            .set_default("controller.idle_threshold_secs", 300)?
            .set_default("daemon.scan_interval_secs", 30)?
            .set_default("daemon.verify_delay_ms", 4000)?
            .set_default("daemon.capture_lines", 100)?
            .set_default("daemon.match_window_lines", 20)?
            .set_default("daemon.auto_approve", true)?
            .set_default("daemon.escalation_threshold", 3)?
            .set_default("logging.level", "info")?
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.project_dir = std::path::absolute(project_dir)?;
        config.normalize()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(Error::Configuration("project.name cannot be empty".into()));
        }
        if self.project.slug.trim().is_empty() {
            self.project.slug = slugify(&self.project.name);
        }
        if !self
            .project
            .slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Configuration(format!(
                "project.slug '{}' can only contain ASCII letters, digits, '-' and '_'",
                self.project.slug
            )));
        }
        if self.workers.is_empty() {
            return Err(Error::Configuration("No workers configured".into()));
        }
        if self.daemon.match_window_lines == 0 {
            return Err(Error::Configuration(
                "daemon.match_window_lines must be at least 1".into(),
            ));
        }
        if self.controller.tick_interval_secs == 0 || self.daemon.scan_interval_secs == 0 {
            return Err(Error::Configuration(
                "tick and scan intervals must be at least one second".into(),
            ));
        }
        if self.controller.idle_threshold_secs > MAX_IDLE_THRESHOLD_SECS {
            return Err(Error::Configuration(format!(
                "controller.idle_threshold_secs cannot exceed {}",
                MAX_IDLE_THRESHOLD_SECS
            )));
        }
        Ok(())
    }

    /// Agent profiles: built-ins plus the project's profile directory
    pub fn profiles(&self) -> Result<ProfileRegistry> {
        Ok(ProfileRegistry::load_dir(&self.profiles_path())?)
    }

    /// Validate the worker set against `profiles`
    ///
    /// Unknown dependencies, cycles and unknown profiles are hard failures.
    pub fn worker_set(&self, profiles: &ProfileRegistry) -> Result<WorkerSet> {
        Ok(WorkerSet::with_profiles(self.workers.clone(), profiles)?)
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.resolve(&self.profiles_dir)
    }

    pub fn worktrees_path(&self) -> PathBuf {
        self.resolve(&self.worktrees_dir)
    }

    pub fn repository_path(&self) -> PathBuf {
        match &self.project.repository {
            Some(repository) => self.resolve(repository),
            None => self
                .project_dir
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.project_dir.join(czarina_storage::manager::LOGS_DIR)
    }

    /// tmux session hosting every worker window
    pub fn session_name(&self) -> String {
        format!("czarina-{}", self.project.slug)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
