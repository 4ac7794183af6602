//! Ambient configuration, resolved once from the process environment.
//!
//! Defaults are loaded first, then overridden field-by-field from the
//! environment; a bad override is logged and ignored rather than treated
//! as fatal, since these are operational knobs, not request input.

use std::env;

/// Effective engine-wide limits and knobs, resolved from environment
/// variables with the documented defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Default per-container memory cap, in bytes. `MAX_MEMORY`, default
    /// `128m`.
    pub max_memory_bytes: u64,
    /// Default per-container CPU quota as a fraction of one core.
    /// `MAX_CPU`, default `0.5`.
    pub max_cpu_fraction: f64,
    /// Wall-clock timeout for interpreted-language executions, in
    /// milliseconds. `DOCKER_TIMEOUT`, default 30,000.
    pub docker_timeout_ms: u64,
    /// Wall-clock timeout for compiled-language executions, in
    /// milliseconds. Fixed at `docker_timeout_ms + 15,000`
    /// (45,000 by default), not independently configurable.
    pub docker_compile_timeout_ms: u64,
    /// Maximum number of sandboxes running concurrently.
    /// `MAX_CONCURRENT_EXECUTIONS`, default 10.
    pub max_concurrent_executions: usize,
    /// Per-stream output cap, in bytes. `OUTPUT_CAP_BYTES`, default
    /// 100,000.
    pub output_cap_bytes: usize,
    /// Optional override of the Docker Engine API endpoint (e.g. a
    /// non-default socket path or a `tcp://` address). Unset means
    /// `bollard`'s own platform default (the local Unix/Windows socket).
    pub docker_host: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 128 * 1024 * 1024,
            max_cpu_fraction: 0.5,
            docker_timeout_ms: 30_000,
            docker_compile_timeout_ms: 45_000,
            max_concurrent_executions: 10,
            output_cap_bytes: 100_000,
            docker_host: None,
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from the process environment, falling back to
    /// [`EngineConfig::default`] field-by-field for anything missing or
    /// unparseable. A malformed value is logged and ignored rather than
    /// treated as fatal — these are operational knobs, not request input.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_memory_bytes: env_bytes("MAX_MEMORY", defaults.max_memory_bytes),
            max_cpu_fraction: env_f64("MAX_CPU", defaults.max_cpu_fraction),
            docker_timeout_ms: env_u64("DOCKER_TIMEOUT", defaults.docker_timeout_ms),
            docker_compile_timeout_ms: env_u64(
                "DOCKER_TIMEOUT",
                defaults.docker_timeout_ms,
            ) + 15_000,
            max_concurrent_executions: env_usize(
                "MAX_CONCURRENT_EXECUTIONS",
                defaults.max_concurrent_executions,
            ),
            output_cap_bytes: env_usize("OUTPUT_CAP_BYTES", defaults.output_cap_bytes),
            docker_host: env::var("DOCKER_HOST").ok(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => parse_byte_unit(&raw).unwrap_or_else(|| {
            tracing::warn!(key, raw, "unparseable env value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_bytes(key: &str, default: u64) -> u64 {
    env_u64(key, default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_u64(key, default as u64) as usize
}

fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<f64>().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "unparseable env value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Parse an integer optionally suffixed with `k`/`m`/`g` (case-insensitive),
/// e.g. `"128m"` -> `134217728`. Bare integers are accepted unsuffixed.
pub fn parse_byte_unit(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, multiplier) = match raw.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&raw[..raw.len() - 1], 1024u64),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&raw[..raw.len() - 1], 1024 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1),
    };
    let n: u64 = digits.trim().parse().ok()?;
    n.checked_mul(multiplier)
}
