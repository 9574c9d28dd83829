//! Runtime configuration.
//!
//! Every field has a default so an empty (or missing) TOML file yields a
//! working configuration. Durations are stored as integer seconds or
//! milliseconds and exposed through accessor methods.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_GATEWAY: &str = "https://arweave.net/";
pub const DEFAULT_APP_URL: &str = "https://app.ardrive.io";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub gateway_url: String,
    /// Web app that sharing links point at.
    pub app_url: String,
    pub app_name: String,
    pub app_version: String,
    /// Version of the entity metadata format written into the `ArFS` tag.
    pub arfs_version: String,
    /// Location of the fjall store. Defaults to the platform data dir.
    pub store_path: Option<PathBuf>,
    pub upload: UploadConfig,
    pub bundle: BundleConfig,
    pub confirmation: ConfirmationConfig,
    pub scan: ScanConfig,
    pub price: PriceConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            app_name: "weavesync".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            arfs_version: "0.11".to_string(),
            store_path: None,
            upload: UploadConfig::default(),
            bundle: BundleConfig::default(),
            confirmation: ConfirmationConfig::default(),
            scan: ScanConfig::default(),
            price: PriceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_concurrent_chunks: usize,
    pub max_errors: u32,
    pub retry_delay_ms: u64,
    pub progress_interval_ms: u64,
    /// Upper bound on a single gateway request, body included.
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chunks: 32,
            max_errors: 100,
            retry_delay_ms: 20_000,
            progress_interval_ms: 250,
            request_timeout_secs: 60,
        }
    }
}

impl UploadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub enabled: bool,
    pub max_bytes: u64,
    pub max_items: usize,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 503_316_480,
            max_items: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub min_confirmations: u64,
    pub window_minutes: i64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            min_confirmations: 15,
            window_minutes: 60,
        }
    }
}

impl ConfirmationConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.window_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_file_size: u64,
    pub stability_window_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_size: 2 * 1024 * 1024 * 1024,
            stability_window_secs: 10,
        }
    }
}

impl ScanConfig {
    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Bytes of transaction header charged per file on top of its data.
    pub header_overhead_bytes: u64,
    /// Winston assumed for each metadata-only transaction in a batch estimate.
    pub metadata_cost_winston: u64,
    pub max_batch_bytes: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            header_overhead_bytes: 3210,
            metadata_cost_winston: 1_000_000,
            max_batch_bytes: 2_000_000_000,
        }
    }
}

impl SyncConfig {
    /// Default config file location (~/.config/weavesync/config.toml)
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SyncError::Config("Cannot determine config directory (HOME not set)".to_string())
        })?;
        Ok(dir.join("weavesync").join("config.toml"))
    }

    /// Default store location (~/.local/share/weavesync/store)
    pub fn default_store_path() -> Result<PathBuf> {
        let dir = dirs::data_dir().ok_or_else(|| {
            SyncError::Config("Cannot determine data directory (HOME not set)".to_string())
        })?;
        Ok(dir.join("weavesync").join("store"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else the default location if it exists,
    /// else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path()?;
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_store_path(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.max_concurrent_chunks == 0 {
            return Err(SyncError::Config(
                "upload.max_concurrent_chunks must be at least 1".to_string(),
            ));
        }
        if self.upload.max_errors == 0 {
            return Err(SyncError::Config(
                "upload.max_errors must be at least 1".to_string(),
            ));
        }
        if self.upload.request_timeout_secs == 0 {
            return Err(SyncError::Config(
                "upload.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.bundle.max_items == 0 || self.bundle.max_bytes == 0 {
            return Err(SyncError::Config(
                "bundle caps must be greater than zero".to_string(),
            ));
        }
        if self.confirmation.window_minutes <= 0 {
            return Err(SyncError::Config(
                "confirmation.window_minutes must be positive".to_string(),
            ));
        }
        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "gateway_url must be an http(s) URL, got {}",
                self.gateway_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.upload.max_concurrent_chunks, 32);
        assert_eq!(config.upload.max_errors, 100);
        assert_eq!(config.upload.retry_delay(), Duration::from_secs(20));
        assert_eq!(config.upload.progress_interval(), Duration::from_millis(250));
        assert_eq!(config.upload.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.bundle.max_bytes, 503_316_480);
        assert_eq!(config.bundle.max_items, 500);
        assert_eq!(config.confirmation.window(), chrono::Duration::minutes(60));
        assert_eq!(config.price.header_overhead_bytes, 3210);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
gateway_url = "http://localhost:1984/"

[bundle]
enabled = false

[upload]
max_errors = 5
"#,
        )
        .unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.gateway_url, "http://localhost:1984/");
        assert!(!config.bundle.enabled);
        assert_eq!(config.bundle.max_items, 500);
        assert_eq!(config.upload.max_errors, 5);
        assert_eq!(config.upload.max_concurrent_chunks, 32);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[upload]\nmax_concurrent_chunks = 0\n").unwrap();
        assert!(matches!(
            SyncConfig::load(&path),
            Err(SyncError::Config(_))
        ));

        std::fs::write(&path, "[upload]\nrequest_timeout_secs = 0\n").unwrap();
        assert!(SyncConfig::load(&path).is_err());

        std::fs::write(&path, "gateway_url = \"ftp://nope\"\n").unwrap();
        assert!(SyncConfig::load(&path).is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "upload = [").unwrap();
        assert!(matches!(
            SyncConfig::load(&path),
            Err(SyncError::ConfigParse(_))
        ));
    }
}
