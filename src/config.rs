//! Service configuration.
//!
//! [`ServiceConfig`] is deserialized from TOML. Every field has a default, so
//! an empty document yields the stock setup: 200 pixel images, artifacts under
//! `images/`, the audit trail in `qrcreate.log`, a 2 second request deadline and
//! persistence failures reported to the caller.
//!
//! ```
//! use qrcode_api::config::{PersistencePolicy, ServiceConfig};
//!
//! let config = ServiceConfig::from_toml_str(r#"
//!     image_size = 300
//!     persistence = "best_effort"
//! "#)?;
//! assert_eq!(config.image_size, 300);
//! assert_eq!(config.persistence, PersistencePolicy::BestEffort);
//! # Ok::<(), qrcode_api::QrApiError>(())
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{QrApiError, Result},
    render::RenderOptions,
};

const DEFAULT_IMAGE_SIZE: u32 = 200;
const DEFAULT_QUIET_ZONE: u32 = 4;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;
/// Upper bound for the request deadline.
const MAX_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// What to do when the artifact or the audit record cannot be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Fail the request with a server error.
    #[default]
    Required,
    /// Log a warning and still return the image.
    BestEffort,
}

/// Configuration for [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Root directory for stored artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// CSV file holding the audit trail.
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,

    /// `fsync` the audit log after every append.
    #[serde(default)]
    pub sync_audit_log: bool,

    /// Width and height of generated images, in pixels.
    #[serde(default = "default_image_size")]
    pub image_size: u32,

    /// Light border around the symbol, in modules.
    #[serde(default = "default_quiet_zone")]
    pub quiet_zone: u32,

    /// Per-request deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How persistence failures are reported.
    #[serde(default)]
    pub persistence: PersistencePolicy,

    /// Target rendered by the unauthenticated root/demo endpoint.
    #[serde(default = "default_demo_target")]
    pub demo_target: String,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("qrcreate.log")
}

fn default_image_size() -> u32 {
    DEFAULT_IMAGE_SIZE
}

fn default_quiet_zone() -> u32 {
    DEFAULT_QUIET_ZONE
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_demo_target() -> String {
    "https://example.com/".to_owned()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            audit_log_path: default_audit_log_path(),
            sync_audit_log: false,
            image_size: DEFAULT_IMAGE_SIZE,
            quiet_zone: DEFAULT_QUIET_ZONE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            persistence: PersistencePolicy::default(),
            demo_target: default_demo_target(),
        }
    }
}

impl ServiceConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| QrApiError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| QrApiError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges. Loading already does this.
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(QrApiError::config("image_size must be positive"));
        }
        // A version 1 symbol needs 21 modules plus the quiet zone.
        if u64::from(self.image_size) < 21 + 2 * u64::from(self.quiet_zone) {
            return Err(QrApiError::config(format!(
                "image_size {} cannot hold the smallest symbol with a {} module quiet zone",
                self.image_size, self.quiet_zone
            )));
        }
        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(QrApiError::config(format!(
                "request_timeout_ms must be within 1..={MAX_REQUEST_TIMEOUT_MS}"
            )));
        }
        if self.demo_target.is_empty() {
            return Err(QrApiError::config("demo_target must not be empty"));
        }
        Ok(())
    }

    /// Image geometry for the renderer.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions { size: self.image_size, border: self.quiet_zone }
    }

    /// Per-request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
