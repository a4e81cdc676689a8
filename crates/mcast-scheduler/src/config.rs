use std::time::Duration;

use serde::Deserialize;

use crate::types::ProbSource;

pub const CONFIG_VERSION: u32 = 1;

/// Raw configuration as read from TOML. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigInput {
    pub version: u32,
    pub tick_ms: Option<u64>,
    pub period_length_ms: Option<u64>,
    pub dms_min_length_ms: Option<u64>,
    pub dms_max_length_ms: Option<u64>,
    pub prob_threshold: Option<u32>,
    pub prob_source: Option<ProbSource>,
    pub event_capacity: Option<usize>,
    pub snapshot_interval_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("probability threshold {0} is outside 0..=100")]
    ThresholdOutOfRange(u32),
    #[error("dms_min_length_ms ({min}) exceeds dms_max_length_ms ({max})")]
    DmsBoundsInverted { min: u64, max: u64 },
}

/// Validated scheduler configuration.
///
/// Window lengths are expressed in milliseconds and converted to ticks by
/// [`crate::period::PeriodAllocator`].
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub version: u32,
    /// Scheduler tick cadence.
    pub tick_ms: u64,
    /// Full DMS + legacy cycle length.
    pub period_length_ms: u64,
    pub dms_min_length_ms: u64,
    pub dms_max_length_ms: u64,
    /// Reliability threshold on the 0-100 probability scale.
    pub prob_threshold: u8,
    /// Metric newly registered groups use to drive their legacy rate.
    pub prob_source: ProbSource,
    /// Bound of the runtime event queue.
    pub event_capacity: usize,
    pub snapshot_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            tick_ms: 50,
            period_length_ms: 3000,
            dms_min_length_ms: 200,
            dms_max_length_ms: 500,
            prob_threshold: 95,
            prob_source: ProbSource::Ewma,
            event_capacity: 1024,
            snapshot_interval: Duration::from_millis(500),
        }
    }
}

impl SchedulerConfigInput {
    pub fn resolve(self) -> Result<SchedulerConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = SchedulerConfig::default();
        let positive = |value: Option<u64>, default: u64, name: &'static str| {
            let value = value.unwrap_or(default);
            if value == 0 {
                Err(ConfigError::Zero(name))
            } else {
                Ok(value)
            }
        };

        let tick_ms = positive(self.tick_ms, defaults.tick_ms, "tick_ms")?;
        let period_length_ms = positive(
            self.period_length_ms,
            defaults.period_length_ms,
            "period_length_ms",
        )?;
        let dms_min_length_ms = positive(
            self.dms_min_length_ms,
            defaults.dms_min_length_ms,
            "dms_min_length_ms",
        )?;
        let dms_max_length_ms = positive(
            self.dms_max_length_ms,
            defaults.dms_max_length_ms,
            "dms_max_length_ms",
        )?;
        if dms_min_length_ms > dms_max_length_ms {
            return Err(ConfigError::DmsBoundsInverted {
                min: dms_min_length_ms,
                max: dms_max_length_ms,
            });
        }

        let threshold = self
            .prob_threshold
            .unwrap_or(u32::from(defaults.prob_threshold));
        let prob_threshold = u8::try_from(threshold)
            .ok()
            .filter(|t| *t <= 100)
            .ok_or(ConfigError::ThresholdOutOfRange(threshold))?;

        let snapshot_interval = Duration::from_millis(positive(
            self.snapshot_interval_ms,
            defaults.snapshot_interval.as_millis() as u64,
            "snapshot_interval_ms",
        )?);

        Ok(SchedulerConfig {
            version,
            tick_ms,
            period_length_ms,
            dms_min_length_ms,
            dms_max_length_ms,
            prob_threshold,
            prob_source: self.prob_source.unwrap_or(defaults.prob_source),
            event_capacity: self
                .event_capacity
                .unwrap_or(defaults.event_capacity)
                .max(16),
            snapshot_interval,
        })
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(SchedulerConfig::default());
        }
        let parsed: SchedulerConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}
