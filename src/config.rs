//! Configuration loading from environment variables.
//!
//! Every value is read from a `GG_ACCEL_*` variable. Missing or invalid
//! values fall back to defaults without failing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_ACCEL_DEVICE_ID` | 0 | Device ordinal |
//! | `GG_ACCEL_DEVICE_MEMORY` | 1073741824 | Emulated device capacity (bytes) |
//! | `GG_ACCEL_PINNED_MEMORY` | 268435456 | Pinned host capacity (bytes) |
//! | `GG_ACCEL_ARENA_MAX_CACHED` | 67108864 | Bytes the scratch arena keeps cached |
//! | `GG_ACCEL_LOG_LEVEL` | info | Tracing filter directive |
//! | `GG_ACCEL_LOG_FORMAT` | json | `json` or `pretty` |
//! | `GG_ACCEL_LOG_FILE` | (stderr) | Log file path |

use std::path::PathBuf;

use serde::Serialize;

use crate::telemetry::{LogConfig, LogFormat};

const MIB: usize = 1024 * 1024;
const MIN_DEVICE_MEMORY: usize = MIB;
const MIN_PINNED_MEMORY: usize = 64 * 1024;

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub device_id: usize,
    pub device_memory: usize,
    pub pinned_memory: usize,
    pub arena_max_cached: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

/// Device, allocator and logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelConfig {
    pub device_id: usize,
    /// Capacity of the emulated device.
    pub device_memory: usize,
    /// Capacity of the pinned host allocator.
    pub pinned_memory: usize,
    /// Upper bound on bytes the arena holds on its free lists.
    pub arena_max_cached: usize,
    pub log: LogConfig,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            device_memory: 1024 * MIB,
            pinned_memory: 256 * MIB,
            arena_max_cached: 64 * MIB,
            log: LogConfig::default(),
        }
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    let level = std::env::var("GG_ACCEL_LOG_LEVEL")
        .ok()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(defaults.level);
    let format = std::env::var("GG_ACCEL_LOG_FORMAT")
        .ok()
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or(defaults.format);
    let output_path = std::env::var_os("GG_ACCEL_LOG_FILE")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Load all configuration from environment variables.
pub fn load() -> AccelConfig {
    let defaults = AccelConfig::default();
    let device_memory = parse_usize("GG_ACCEL_DEVICE_MEMORY", defaults.device_memory);
    let pinned_memory = parse_usize("GG_ACCEL_PINNED_MEMORY", defaults.pinned_memory);

    AccelConfig {
        device_id: parse_usize("GG_ACCEL_DEVICE_ID", defaults.device_id),
        device_memory: device_memory.max(MIN_DEVICE_MEMORY),
        pinned_memory: pinned_memory.max(MIN_PINNED_MEMORY),
        arena_max_cached: parse_usize("GG_ACCEL_ARENA_MAX_CACHED", defaults.arena_max_cached),
        log: load_log_config(),
    }
}

impl AccelConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            device_id: self.device_id,
            device_memory: self.device_memory,
            pinned_memory: self.pinned_memory,
            arena_max_cached: self.arena_max_cached,
            log_level: self.log.level.clone(),
            log_format: self.log.format,
            log_file: self.log.output_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "GG_ACCEL_DEVICE_ID",
        "GG_ACCEL_DEVICE_MEMORY",
        "GG_ACCEL_PINNED_MEMORY",
        "GG_ACCEL_ARENA_MAX_CACHED",
        "GG_ACCEL_LOG_LEVEL",
        "GG_ACCEL_LOG_FORMAT",
        "GG_ACCEL_LOG_FILE",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg, AccelConfig::default());
        assert_eq!(cfg.device_memory, 1024 * 1024 * 1024);
        assert_eq!(cfg.pinned_memory, 256 * 1024 * 1024);
        assert_eq!(cfg.arena_max_cached, 64 * 1024 * 1024);
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.level, "info");
        assert!(cfg.log.output_path.is_none());
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_ACCEL_DEVICE_ID", "2");
        std::env::set_var("GG_ACCEL_DEVICE_MEMORY", "8388608");
        std::env::set_var("GG_ACCEL_ARENA_MAX_CACHED", "0");
        std::env::set_var("GG_ACCEL_LOG_LEVEL", "gg_accel=trace");
        std::env::set_var("GG_ACCEL_LOG_FORMAT", "Pretty");
        std::env::set_var("GG_ACCEL_LOG_FILE", "/tmp/accel.log");
        let cfg = load();
        assert_eq!(cfg.device_id, 2);
        assert_eq!(cfg.device_memory, 8 * 1024 * 1024);
        assert_eq!(cfg.arena_max_cached, 0);
        assert_eq!(cfg.log.level, "gg_accel=trace");
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        assert_eq!(cfg.log.output_path, Some(PathBuf::from("/tmp/accel.log")));
        clear_env_vars();
    }

    #[test]
    fn test_memory_floors() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_ACCEL_DEVICE_MEMORY", "16");
        std::env::set_var("GG_ACCEL_PINNED_MEMORY", "0");
        let cfg = load();
        assert_eq!(cfg.device_memory, 1024 * 1024);
        assert_eq!(cfg.pinned_memory, 64 * 1024);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_ACCEL_DEVICE_ID", "gpu0");
        std::env::set_var("GG_ACCEL_PINNED_MEMORY", "-1");
        std::env::set_var("GG_ACCEL_LOG_FORMAT", "xml");
        std::env::set_var("GG_ACCEL_LOG_LEVEL", "  ");
        let cfg = load();
        assert_eq!(cfg.device_id, 0);
        assert_eq!(cfg.pinned_memory, 256 * 1024 * 1024);
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.level, "info");
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_serializes() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let eff = load().effective_config();
        let json = serde_json::to_value(&eff).unwrap();
        assert_eq!(json["device_id"], 0);
        assert_eq!(json["pinned_memory"], 256 * 1024 * 1024);
        assert_eq!(json["log_format"], "json");
        assert!(json["log_file"].is_null());
    }
}
