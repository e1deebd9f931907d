//! Manager configuration: probe timing, reconnection policy and log capacity.
//!
//! Every knob can be overridden through `PERSONA_WS_*` environment variables.
//! Out-of-range values are clamped, unparseable values fall back to defaults.

use std::time::Duration;

const PING_INTERVAL_ENV: &str = "PERSONA_WS_PING_INTERVAL_SECS";
const PING_TIMEOUT_ENV: &str = "PERSONA_WS_PING_TIMEOUT_SECS";
const RECONNECT_DELAY_ENV: &str = "PERSONA_WS_RECONNECT_DELAY_SECS";
const RECONNECT_MULTIPLIER_ENV: &str = "PERSONA_WS_RECONNECT_MULTIPLIER";
const RECONNECT_MAX_DELAY_ENV: &str = "PERSONA_WS_RECONNECT_MAX_DELAY_SECS";
const RECONNECT_MAX_ATTEMPTS_ENV: &str = "PERSONA_WS_RECONNECT_MAX_ATTEMPTS";
const RECONNECT_JITTER_ENV: &str = "PERSONA_WS_RECONNECT_JITTER";
const RETRY_ON_OPEN_FAILURE_ENV: &str = "PERSONA_WS_RETRY_ON_OPEN_FAILURE";
const LOG_CAPACITY_ENV: &str = "PERSONA_WS_LOG_CAPACITY";

const PING_INTERVAL_SECS: u64 = 30;
const PING_TIMEOUT_SECS: u64 = 5;
const RECONNECT_DELAY_SECS: u64 = 5;
const RECONNECT_MULTIPLIER: f64 = 2.0;
const RECONNECT_MAX_DELAY_SECS: u64 = 60;
const RECONNECT_MAX_ATTEMPTS: u32 = 10;
const RECONNECT_JITTER: f64 = 0.1;
const LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub probe: ProbeConfig,
    pub reconnect: ReconnectPolicy,
    /// Maximum retained log entries; the oldest are evicted first
    pub log_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            reconnect: ReconnectPolicy::default(),
            log_capacity: LOG_CAPACITY,
        }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            probe: ProbeConfig {
                interval: Duration::from_secs(parse_u64_with_bounds(
                    lookup(PING_INTERVAL_ENV),
                    1,
                    3600,
                    PING_INTERVAL_SECS,
                )),
                timeout: Duration::from_secs(parse_u64_with_bounds(
                    lookup(PING_TIMEOUT_ENV),
                    1,
                    600,
                    PING_TIMEOUT_SECS,
                )),
            },
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_secs(parse_u64_with_bounds(
                    lookup(RECONNECT_DELAY_ENV),
                    1,
                    3600,
                    RECONNECT_DELAY_SECS,
                )),
                multiplier: parse_f64_with_bounds(
                    lookup(RECONNECT_MULTIPLIER_ENV),
                    1.0,
                    10.0,
                    RECONNECT_MULTIPLIER,
                ),
                max_delay: Duration::from_secs(parse_u64_with_bounds(
                    lookup(RECONNECT_MAX_DELAY_ENV),
                    1,
                    86_400,
                    RECONNECT_MAX_DELAY_SECS,
                )),
                max_attempts: parse_u64_with_bounds(
                    lookup(RECONNECT_MAX_ATTEMPTS_ENV),
                    0,
                    u64::from(u32::MAX),
                    u64::from(RECONNECT_MAX_ATTEMPTS),
                ) as u32,
                jitter: parse_f64_with_bounds(lookup(RECONNECT_JITTER_ENV), 0.0, 1.0, RECONNECT_JITTER),
                retry_on_open_failure: parse_bool_flag(lookup(RETRY_ON_OPEN_FAILURE_ENV), true),
            },
            log_capacity: parse_u64_with_bounds(
                lookup(LOG_CAPACITY_ENV),
                1,
                1_000_000,
                defaults.log_capacity as u64,
            ) as usize,
        }
    }
}

/// Liveness probe timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(PING_INTERVAL_SECS),
            timeout: Duration::from_secs(PING_TIMEOUT_SECS),
        }
    }
}

/// Retry policy applied after an abnormal close (and, when enabled, after a
/// failed open).
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    /// Growth factor applied per attempt; 1.0 keeps the delay constant
    pub multiplier: f64,
    pub max_delay: Duration,
    /// 0 = unlimited
    pub max_attempts: u32,
    /// Fraction of the delay randomly added or removed (0.0..=1.0)
    pub jitter: f64,
    pub retry_on_open_failure: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            multiplier: RECONNECT_MULTIPLIER,
            max_delay: Duration::from_secs(RECONNECT_MAX_DELAY_SECS),
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            jitter: RECONNECT_JITTER,
            retry_on_open_failure: true,
        }
    }
}

impl ReconnectPolicy {
    /// Constant delay, no jitter, unlimited attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            max_attempts: 0,
            jitter: 0.0,
            retry_on_open_failure: true,
        }
    }

    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Delay before `attempt` (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64().max(self.initial_delay.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }

    /// Delay before `attempt` with jitter drawn from `unit` (expected in `0.0..1.0`).
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let spread = base * self.jitter;
        let offset = spread * (unit.clamp(0.0, 1.0) * 2.0 - 1.0);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

fn parse_u64_with_bounds(raw: Option<String>, min: u64, max: u64, default: u64) -> u64 {
    match raw.and_then(|value| value.trim().parse::<u64>().ok()) {
        Some(parsed) => parsed.clamp(min, max),
        None => default,
    }
}

fn parse_f64_with_bounds(raw: Option<String>, min: f64, max: f64, default: f64) -> f64 {
    match raw
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
    {
        Some(parsed) => parsed.clamp(min, max),
        None => default,
    }
}

fn parse_bool_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}
