//! Runtime settings.
//!
//! Defaults are overlaid by an optional TOML file (`SANTA_CONFIG`) and then by
//! individual environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use draw_core::{DrawStrategy, HouseholdRule};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub admin_password: String,
    /// JSON snapshot of the document store; in-memory only when unset.
    pub persist_path: Option<PathBuf>,
    pub store_timeout_ms: u64,
    /// Engine runs per draw before `Infeasible` is reported.
    pub max_draw_attempts: u32,
    pub household_rule: HouseholdRule,
    pub draw_strategy: DrawStrategy,
    /// Reveal only once the giver has names and a wishlist.
    pub require_complete_profile: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            admin_password: "changeme".to_string(),
            persist_path: None,
            store_timeout_ms: 2_000,
            max_draw_attempts: 20,
            household_rule: HouseholdRule::default(),
            draw_strategy: DrawStrategy::default(),
            require_complete_profile: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let mut settings = match env::var("SANTA_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        Self::from_toml(&raw).with_context(|| format!("failed to parse config file {path}"))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = env::var("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(password) = env::var("ADMIN_PASSWORD") {
            self.admin_password = password;
        }
        if let Ok(path) = env::var("PERSIST_PATH") {
            self.persist_path = Some(PathBuf::from(path));
        }
        if let Ok(ms) = env::var("STORE_TIMEOUT_MS") {
            self.store_timeout_ms = ms.parse().context("STORE_TIMEOUT_MS must be an integer")?;
        }
        if let Ok(attempts) = env::var("MAX_DRAW_ATTEMPTS") {
            self.max_draw_attempts = attempts
                .parse()
                .context("MAX_DRAW_ATTEMPTS must be an integer")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_draw_attempts == 0 {
            bail!("max_draw_attempts must be at least 1");
        }
        if self.store_timeout_ms == 0 {
            bail!("store_timeout_ms must be positive");
        }
        if self.admin_password.is_empty() {
            bail!("admin_password must not be empty");
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
