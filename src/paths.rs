//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Portable mode**: If a `.portable` marker file exists next to the
//!   executable, all data files are stored in the same directory.
//! - **Installed mode** (default): Data is stored in the platform data
//!   directory under `LR MIDI GW` (`%APPDATA%` on Windows,
//!   `~/.local/share` on Linux, `~/Library/Application Support` on macOS).

use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories in installed mode
const APP_NAME: &str = "LR MIDI GW";

/// Application paths for config, persisted state, profiles and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Persisted control state document
    pub controls: PathBuf,
    /// Directory holding profile documents
    pub profiles_dir: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (files next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Called before logging is initialized, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        // In debug builds a config.yaml in the working directory wins
        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!("[paths] Running in DEV mode (config.yaml found in {})", cwd.display());
                return Self::rooted_at(&cwd, true);
            }
        }

        if exe_dir.join(".portable").exists() {
            return Self::rooted_at(&exe_dir, true);
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform data directory, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);
        Self::rooted_at(&app_data, false)
    }

    /// Every path under one base directory
    pub fn rooted_at(base: &Path, is_portable: bool) -> Self {
        Self {
            config: base.join("config.yaml"),
            controls: base.join("controls.json"),
            profiles_dir: base.join("profiles"),
            logs_dir: base.join("logs"),
            is_portable,
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Use `config` as the configuration file, keeping data next to it
    pub fn with_config(config: PathBuf) -> Self {
        let base = config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config,
            ..Self::rooted_at(&base, true)
        }
    }

    /// Resolve the profile directory from config (relative to the base dir)
    pub fn resolve_profiles_dir(&self, configured: Option<&Path>) -> PathBuf {
        match configured {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.base_dir().join(dir),
            None => self.profiles_dir.clone(),
        }
    }

    /// Ensure the profile and log directories exist.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.profiles_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}
