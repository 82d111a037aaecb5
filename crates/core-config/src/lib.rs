//! Runtime tunables parsed from `trellis.toml`.
//!
//! Scope: the ambient knobs of the kernel loop, not editor features. The
//! `[event]` table drives the tick source, `[dispatch]` the per-call time
//! budget, `[log]` the tracing file destination. Unknown fields are
//! ignored (TOML deserialization tolerance) so the file can grow without
//! breaking older binaries.

use std::{fs, path::PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct EventConfig {
    /// Tick interval in milliseconds.
    #[serde(default = "EventConfig::default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            tick_ms: Self::default_tick_ms(),
        }
    }
}

impl EventConfig {
    const fn default_tick_ms() -> u64 {
        250
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DispatchConfig {
    /// Per-event time budget in milliseconds; 0 disables the deadline.
    #[serde(default)]
    pub time_budget_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    /// Log file path; empty means the working directory default.
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub event: EventConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file text, when one was read.
    pub raw: Option<String>,
    /// Parsed (or default) data.
    pub file: ConfigFile,
    /// Tick interval clamped to a sane floor.
    pub effective_tick_ms: u64,
}

impl Config {
    /// Clamp raw values to usable ranges. A tick below 10ms is treated as
    /// a typo and floored; the raw value is retained for re-clamping.
    pub fn apply_context(&mut self) {
        self.effective_tick_ms = self.file.event.tick_ms.max(10);
    }
}

/// Best-effort config path: a working-directory `trellis.toml` wins,
/// otherwise the platform config directory.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("trellis.toml");
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|d| d.join("trellis").join("trellis.toml"))
        .unwrap_or(local)
}

/// Load and parse a config file. A missing file yields the defaults; a
/// malformed file is an error (silent fallback would hide typos).
pub fn load_from(path: &PathBuf) -> Result<Config> {
    let mut cfg = Config::default();
    match fs::read_to_string(path) {
        Ok(raw) => {
            cfg.file = toml::from_str(&raw)?;
            cfg.raw = Some(raw);
            info!(target: "runtime.config", path = %path.display(), "config loaded");
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(target: "runtime.config", path = %path.display(), "no config file, using defaults");
        }
        Err(err) => return Err(err.into()),
    }
    cfg.apply_context();
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_when_missing() {
        let path = PathBuf::from("/definitely/not/here/trellis.toml");
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.effective_tick_ms, 250);
        assert_eq!(cfg.file.dispatch.time_budget_ms, 0);
        assert!(cfg.raw.is_none());
    }

    #[test]
    fn parses_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trellis.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[event]\ntick_ms = 2\n[dispatch]\ntime_budget_ms = 50\n[log]\nfile = \"/tmp/t.log\""
        )
        .unwrap();
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.file.event.tick_ms, 2);
        assert_eq!(cfg.effective_tick_ms, 10, "sub-10ms ticks are floored");
        assert_eq!(cfg.file.dispatch.time_budget_ms, 50);
        assert_eq!(cfg.file.log.file, "/tmp/t.log");
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trellis.toml");
        fs::write(&path, "[future]\nshiny = true\n[event]\ntick_ms = 100\n").unwrap();
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.effective_tick_ms, 100);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trellis.toml");
        fs::write(&path, "event = not toml").unwrap();
        assert!(load_from(&path).is_err());
    }
}
