use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::logger;

/// Counters and values kept in a JSON object file across runs. The file is
/// rewritten after every mutation; a missing or unreadable file starts empty.
pub struct PersistentStats {
    path: PathBuf,
    values: Map<String, Value>,
}

impl PersistentStats {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(values) => values,
                Err(e) => {
                    logger::warn_p("stats", &format!("ignoring unreadable {}: {}", path.display(), e));
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        let stats = Self { path, values };
        if let Err(e) = stats.save() {
            logger::warn_p("stats", &format!("could not write {}: {}", stats.path.display(), e));
        }
        stats
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, stat: &str) -> Option<&Value> {
        self.values.get(stat)
    }

    pub fn count(&self, stat: &str) -> i64 {
        self.values.get(stat).and_then(Value::as_i64).unwrap_or(0)
    }

    /// Add one to `stat` and return the new count.
    pub fn increment(&mut self, stat: &str) -> Result<i64> {
        let n = self.count(stat) + 1;
        self.values.insert(stat.to_string(), Value::from(n));
        self.save()?;
        Ok(n)
    }

    pub fn record_value(&mut self, stat: &str, value: impl Into<Value>) -> Result<()> {
        self.values.insert(stat.to_string(), value.into());
        self.save()
    }

    /// Store the current local time, e.g. `18-Oct-2026 (09:15:02.123456)`.
    pub fn record_date(&mut self, stat: &str) -> Result<()> {
        let now = Local::now().format("%d-%b-%Y (%H:%M:%S%.6f)").to_string();
        self.record_value(stat, now)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.values)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let mut stats = PersistentStats::open(&path);
        assert_eq!(stats.increment("wins").unwrap(), 1);
        assert_eq!(stats.increment("wins").unwrap(), 2);
        stats.record_value("best", 17).unwrap();
        stats.record_date("last_run").unwrap();

        let reopened = PersistentStats::open(&path);
        assert_eq!(reopened.count("wins"), 2);
        assert_eq!(reopened.get("best"), Some(&Value::from(17)));
        assert!(reopened.get("last_run").and_then(Value::as_str).is_some_and(|s| s.contains('(')));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "{not json").unwrap();
        let stats = PersistentStats::open(&path);
        assert!(stats.values().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
