//! printlink configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/printlink/printlink.toml`
//! - Windows: `%APPDATA%/printlink/printlink.toml`

use std::path::{Path, PathBuf};

use printlink_data_channel::RtcConfig;
use serde::{Deserialize, Serialize};

/// printlink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Display name of this print agent (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// Merchant the demo agent serves.
    #[serde(default = "default_merchant_id")]
    pub merchant_id: String,

    /// Directory the spool surface writes documents to.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    /// Price of one printed copy.
    #[serde(default = "default_rate")]
    pub rate_per_copy: f64,

    /// Seconds a job may take from acceptance to `awaitingPayment`.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout: u64,

    /// Confirm payment and complete the job as soon as it is priced.
    #[serde(default)]
    pub auto_confirm_payment: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Peer connection settings.
    #[serde(default)]
    pub rtc: RtcConfig,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "printlink agent".into())
}

fn default_merchant_id() -> String {
    "local".into()
}

fn default_spool_dir() -> PathBuf {
    std::env::temp_dir().join("printlink").join("spool")
}

fn default_rate() -> f64 {
    1.0
}

fn default_transfer_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            merchant_id: default_merchant_id(),
            spool_dir: default_spool_dir(),
            rate_per_copy: default_rate(),
            transfer_timeout: default_transfer_timeout(),
            auto_confirm_payment: false,
            log_level: default_log_level(),
            rtc: RtcConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default), creating
    /// a default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("printlink")
            .join("printlink.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("printlink").join("printlink.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/printlink/printlink.toml")
    }
}
