//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.castellan/config.toml` (or the path in `CASTELLAN_CONFIG`)
//! 2. Apply `CASTELLAN_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing
//!
//! # Atomic save
//! Writes to `<path>.tmp` → fsync → rename to `<path>` to avoid partial
//! writes corrupting the config file.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.castellan/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".castellan").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path, creating the directory if needed.
pub fn load_default_config() -> AppConfig {
    let path = env::var("CASTELLAN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
        });

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `CASTELLAN_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `CASTELLAN_SECURITY_LEVEL`        → `security.autonomy_level`
/// - `CASTELLAN_DRY_RUN`               → `security.dry_run_mode` (1/0)
/// - `CASTELLAN_DAILY_CAP_USD`         → `provider.daily_cap_usd`
/// - `CASTELLAN_LUDICROUS_ENABLED`     → `provider.ludicrous_enabled` (1/0)
/// - `CASTELLAN_HEARTBEAT_INTERVAL`    → `scheduler.heartbeat_interval_secs`
/// - `CASTELLAN_HEARTBEAT_ENABLED`     → `scheduler.heartbeat_enabled` (1/0)
/// - `CASTELLAN_MEMORY_ENABLED`        → `memory.enabled` (1/0)
/// - `CASTELLAN_NOTIFICATIONS_ENABLED` → `notifications.enabled` (1/0)
/// - `CASTELLAN_DO_NOT_DISTURB`        → `notifications.do_not_disturb` (1/0)
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("CASTELLAN_SECURITY_LEVEL") {
        config.security.autonomy_level = v;
    }
    if let Ok(v) = env::var("CASTELLAN_DRY_RUN") {
        config.security.dry_run_mode = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("CASTELLAN_DAILY_CAP_USD") {
        if let Ok(cap) = v.parse::<f64>() {
            config.provider.daily_cap_usd = cap;
        }
    }
    if let Ok(v) = env::var("CASTELLAN_LUDICROUS_ENABLED") {
        config.provider.ludicrous_enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("CASTELLAN_HEARTBEAT_INTERVAL") {
        if let Ok(secs) = v.parse::<u64>() {
            config.scheduler.heartbeat_interval_secs = secs;
        }
    }
    if let Ok(v) = env::var("CASTELLAN_HEARTBEAT_ENABLED") {
        config.scheduler.heartbeat_enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("CASTELLAN_MEMORY_ENABLED") {
        config.memory.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("CASTELLAN_NOTIFICATIONS_ENABLED") {
        config.notifications.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("CASTELLAN_DO_NOT_DISTURB") {
        config.notifications.do_not_disturb = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

// ─── save_config ─────────────────────────────────────────────────────────────

/// Atomically save `config` to `path`.
///
/// Writes to `<path>.tmp`, syncs to disk, creates a backup of the existing
/// file as `<path>.bak`, then renames the temp file to `<path>`.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| format!("failed to serialise config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_extension("toml.tmp");

    fs::write(&tmp_path, &content)
        .map_err(|e| format!("failed to write temp config: {e}"))?;

    if path.exists() {
        let bak_path = path.with_extension("toml.bak");
        fs::copy(path, &bak_path)
            .map_err(|e| format!("failed to backup config: {e}"))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| format!("failed to replace config file: {e}"))?;

    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
