use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TIDEMARK_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TIDEMARK_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            scheduler: SchedulerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        let s = &self.scheduler;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  scheduler:   lock_shards={}, workers={}", s.lock_shards, s.resolved_workers());
        tracing::info!("  ids:         output_prefix={}", s.output_prefix);
        tracing::info!("  notify:      broadcast_capacity={}", s.broadcast_capacity);
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Size of the per-node lock array.
    pub lock_shards: usize,
    /// Background workers. 0 = available parallelism.
    pub workers: usize,
    /// Fixed prefix of minted output ids.
    pub output_prefix: String,
    /// Buffered notifications per live subscriber.
    pub broadcast_capacity: usize,
}

pub const DEFAULT_LOCK_SHARDS: usize = 1024;
pub const DEFAULT_OUTPUT_PREFIX: &str = "expr_";
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_shards: DEFAULT_LOCK_SHARDS,
            workers: 0,
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            lock_shards: profiled_env_usize(p, "TIDEMARK_LOCK_SHARDS", DEFAULT_LOCK_SHARDS).max(1),
            workers: profiled_env_usize(p, "TIDEMARK_WORKERS", 0),
            output_prefix: profiled_env_or(p, "TIDEMARK_OUTPUT_PREFIX", DEFAULT_OUTPUT_PREFIX),
            broadcast_capacity: profiled_env_usize(p, "TIDEMARK_BROADCAST_CAPACITY", DEFAULT_BROADCAST_CAPACITY)
                .max(1),
        }
    }

    /// Resolve worker count (0 means use available parallelism).
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}
