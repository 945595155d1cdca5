use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logger::{self, Level};
use crate::platform::DeviceSettings;

/// Which frame the "confirm all" re-check runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// Capture a new frame and re-score the chosen action on it.
    #[default]
    FreshCapture,
    /// Re-score on the frame already used for scoring.
    ReuseFrame,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub action_retry_secs: f64,
    pub poll_interval_secs: f64,
    pub confidence_floor: f64,
    pub device_backoff_secs: f64,
    pub cooldown_tick_secs: f64,
    pub confirm_policy: ConfirmPolicy,
    pub strict_exit: bool,
    pub timeout_secs: Option<f64>,
    pub log_level: Level,
    pub log_echo: bool,
    pub debug: DebugSettings,
    pub device: DeviceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            action_retry_secs: 4.0,
            poll_interval_secs: 0.5,
            confidence_floor: 20.0,
            device_backoff_secs: 10.0,
            cooldown_tick_secs: 0.1,
            confirm_policy: ConfirmPolicy::default(),
            strict_exit: false,
            timeout_secs: None,
            log_level: Level::Info,
            log_echo: false,
            debug: DebugSettings::default(),
            device: DeviceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub save_detect_images: bool,
    pub folder: PathBuf,
    pub log_folder: PathBuf,
    pub image_expire: String,
    pub log_expire: String,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            save_detect_images: false,
            folder: PathBuf::from("debug"),
            log_folder: PathBuf::from("logs"),
            image_expire: "7 days".into(),
            log_expire: "7 days".into(),
        }
    }
}

impl DebugSettings {
    pub fn image_expire(&self) -> Result<Duration> {
        parse_duration(&self.image_expire)
    }

    pub fn log_expire(&self) -> Result<Duration> {
        parse_duration(&self.log_expire)
    }
}

fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v.max(0.0)).unwrap_or(Duration::MAX)
}

/// Seconds read from a config document; negative values count as zero.
pub fn seconds(v: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(v.max(0.0))
        .map_err(|_| Error::InvalidInput(format!("{what} of {v} seconds is out of range")))
}

impl Settings {
    /// Missing or unreadable settings fall back to defaults.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&text) {
            Ok(s) => s,
            Err(e) => {
                logger::warn(&format!("ignoring {}: {}", path.display(), e));
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn retry_duration(&self) -> Duration {
        secs(self.action_retry_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }

    pub fn device_backoff(&self) -> Duration {
        secs(self.device_backoff_secs)
    }

    pub fn cooldown_tick(&self) -> Duration {
        secs(self.cooldown_tick_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(secs)
    }
}

/// Parse `"7 days"`, `"12 hours"`, `"30 minutes"` or a bare number of seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let bad = || Error::InvalidInput(format!(
        "expected a duration like '7 days', '12 hours' or '30', got {text:?}"
    ));
    let mut parts = text.split_whitespace();
    let value: u64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let unit = match parts.next().map(str::to_lowercase).as_deref() {
        None | Some("s" | "sec" | "second" | "seconds") => 1,
        Some("minute" | "minutes") => 60,
        Some("hour" | "hours") => 60 * 60,
        Some("day" | "days") => 24 * 60 * 60,
        Some(_) => return Err(bad()),
    };
    if parts.next().is_some() {
        return Err(bad());
    }
    value.checked_mul(unit).map(Duration::from_secs).ok_or_else(bad)
}
