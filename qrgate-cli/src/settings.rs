//! Persisted user settings (`settings.toml`).
//!
//! Read once at startup and written back whenever the user changes
//! something (login, region, backend choice).

use std::path::Path;

use serde::{Deserialize, Serialize};

use qrgate_core::capture::{CaptureMethod, Region};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Cool down and rescan after an expired code.
    pub auto_retry: bool,
    /// Ask the service to remember this device.
    pub auto_login: bool,
    /// Split binarization across all cores.
    pub thread_pool_enabled: bool,
    /// Account token from the last SDK login.
    pub token: String,
    pub uid: String,
    /// Capture backend to try first.
    pub capture_backend: Option<CaptureMethod>,
    /// Last capture region.
    pub region: Option<Region>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            auto_retry: true,
            auto_login: false,
            thread_pool_enabled: false,
            token: String::new(),
            uid: String::new(),
            capture_backend: None,
            region: None,
        }
    }
}

impl UserSettings {
    /// Read settings, falling back to defaults when missing or invalid.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid settings {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, text)
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let settings = UserSettings::load(Path::new("/definitely/not/here/settings.toml"));
        assert_eq!(settings, UserSettings::default());
        assert!(settings.auto_retry);
        assert!(!settings.has_token());
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("qrgate-settings-{}", std::process::id()))
            .join("settings.toml");
        let settings = UserSettings {
            token: "tkn".into(),
            uid: "42".into(),
            capture_backend: Some(CaptureMethod::BitBlt),
            region: Some(Region::new(10, 20, 300, 400)),
            ..UserSettings::default()
        };
        settings.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("capture_backend = \"bitblt\""));
        assert_eq!(UserSettings::load(&path), settings);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let parsed: Result<UserSettings, _> = toml::from_str("capture_backend = \"vnc\"\n");
        assert!(parsed.is_err());
    }
}
