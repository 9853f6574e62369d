//! Static configuration (`qrgate.toml`).
//!
//! Tuning that rarely changes. User choices made at runtime live in
//! [`crate::settings::UserSettings`] instead.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use qrgate_core::auth::{AuthConfig, DEFAULT_BASE_URL};
use qrgate_core::capture::{DEFAULT_POOL_CAP, Region};
use qrgate_core::decode::{DEFAULT_MARKER, DEFAULT_WORKERS, DecodeConfig};
use qrgate_core::scan::ScanConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanSection,
    pub decode: DecodeSection,
    pub capture: CaptureSection,
    pub network: NetworkSection,
    pub logging: LoggingConfig,
}

/// Polling and retry timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// Ticker period while scanning.
    pub poll_interval_ms: u64,
    /// Pause after an expired code.
    pub cooldown_ms: u64,
    /// Substring every accepted payload must contain.
    pub marker: String,
    /// Narrow captures to where codes were recently found.
    pub use_roi: bool,
    /// Capture region used when no region was saved in settings.
    pub region: Region,
}

/// Candidate generation and the decode race.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeSection {
    /// Concurrent decode workers.
    pub workers: usize,
    pub analysis_width: u32,
    pub analysis_height: u32,
    /// Size of the downscaled candidate relative to the frame.
    pub downscale: f32,
    /// Split binarization across all cores.
    pub parallel_enhance: bool,
}

/// Frame buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Spare buffers kept per frame shape.
    pub pool_cap: usize,
    /// Allocate buffers for common shapes at startup.
    pub prewarm: bool,
}

/// Login service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub base_url: String,
    /// Validate timeouts, tried in order on timeout.
    pub validate_ladder_ms: Vec<u64>,
    /// Confirm timeouts, tried in order on timeout.
    pub confirm_ladder_ms: Vec<u64>,
    /// Use the ladders; when off each call gets one fixed budget.
    pub smart_retry: bool,
    /// Budget for SDK login and SMS requests.
    pub account_timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ScanSection {
    fn default() -> Self {
        let scan = ScanConfig::default();
        Self {
            poll_interval_ms: scan.poll_interval.as_millis() as u64,
            cooldown_ms: scan.cooldown.as_millis() as u64,
            marker: DEFAULT_MARKER.into(),
            use_roi: scan.use_roi,
            region: scan.region,
        }
    }
}

impl Default for DecodeSection {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            analysis_width: 1280,
            analysis_height: 720,
            downscale: 0.4,
            parallel_enhance: false,
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            pool_cap: DEFAULT_POOL_CAP,
            prewarm: true,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            validate_ladder_ms: vec![600, 1200, 2000],
            confirm_ladder_ms: vec![800, 1500, 2500],
            smart_retry: true,
            account_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    // ── Conversions ──────────────────────────────────────────────

    pub fn to_scan_config(&self) -> ScanConfig {
        let region = if self.scan.region.is_empty() {
            ScanConfig::default().region
        } else {
            self.scan.region
        };
        ScanConfig {
            poll_interval: Duration::from_millis(self.scan.poll_interval_ms.clamp(10, 1000)),
            cooldown: Duration::from_millis(self.scan.cooldown_ms.min(60_000)),
            auto_retry: true,
            region,
            use_roi: self.scan.use_roi,
        }
    }

    pub fn to_decode_config(&self) -> DecodeConfig {
        let marker = if self.scan.marker.is_empty() {
            DEFAULT_MARKER.to_string()
        } else {
            self.scan.marker.clone()
        };
        DecodeConfig {
            workers: self.decode.workers.clamp(1, 16),
            marker,
            analysis_size: (
                self.decode.analysis_width.max(64),
                self.decode.analysis_height.max(64),
            ),
            downscale: self.decode.downscale.clamp(0.1, 1.0),
            parallel_enhance: self.decode.parallel_enhance,
        }
    }

    pub fn to_auth_config(&self) -> AuthConfig {
        let defaults = AuthConfig::default();
        AuthConfig {
            validate_ladder: ladder(&self.network.validate_ladder_ms, &defaults.validate_ladder),
            confirm_ladder: ladder(&self.network.confirm_ladder_ms, &defaults.confirm_ladder),
            smart_retry: self.network.smart_retry,
            account_timeout: Duration::from_millis(self.network.account_timeout_ms.clamp(500, 30_000)),
            ..defaults
        }
    }
}

/// Drop zero rungs and cap each at 30 s; an empty ladder means defaults.
fn ladder(ms: &[u64], fallback: &[Duration]) -> Vec<Duration> {
    let rungs: Vec<Duration> = ms
        .iter()
        .filter(|&&ms| ms > 0)
        .map(|&ms| Duration::from_millis(ms.min(30_000)))
        .collect();
    if rungs.is_empty() {
        fallback.to_vec()
    } else {
        rungs
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        assert!(text.contains("poll_interval_ms"));
        assert!(text.contains("validate_ladder_ms"));
        assert!(text.contains("G152#KURO"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: AppConfig = toml::from_str("[network]\nsmart_retry = false\n").unwrap();
        assert!(!cfg.network.smart_retry);
        assert_eq!(cfg.network.validate_ladder_ms, vec![600, 1200, 2000]);
        assert_eq!(cfg.scan.poll_interval_ms, 100);
        assert_eq!(cfg.scan.region, Region::new(560, 140, 800, 800));
    }

    #[test]
    fn conversions_clamp() {
        let mut cfg = AppConfig::default();
        cfg.scan.poll_interval_ms = 0;
        cfg.scan.marker.clear();
        cfg.decode.workers = 0;
        cfg.decode.downscale = 4.0;
        cfg.network.validate_ladder_ms = vec![0, 90_000];
        cfg.network.confirm_ladder_ms.clear();

        assert_eq!(cfg.to_scan_config().poll_interval, Duration::from_millis(10));
        let decode = cfg.to_decode_config();
        assert_eq!(decode.workers, 1);
        assert_eq!(decode.marker, DEFAULT_MARKER);
        assert_eq!(decode.downscale, 1.0);
        let auth = cfg.to_auth_config();
        assert_eq!(auth.validate_ladder, vec![Duration::from_secs(30)]);
        assert_eq!(auth.confirm_ladder, AuthConfig::default().confirm_ladder);
    }
}
