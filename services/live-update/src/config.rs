//! Engine configuration
//!
//! Defaults match production. `from_env` overrides individual values from
//! `LIVE_UPDATE_*` variables; unparsable values fall back to the default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::BootstrapError;

/// Depth chart shape parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartConfig {
    /// Maximum buckets per side.
    pub bucket_limit: usize,
    /// Half-width of the visible window as a fraction of the mid price.
    pub visible_range: Decimal,
    /// Relative drift of the window edges before it is recentred.
    pub range_change: Decimal,
    /// Extra crossing, beyond the book's own spread, tolerated before the
    /// best buckets are split.
    pub crossed_spread_tolerance: Decimal,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            bucket_limit: 100,
            visible_range: Decimal::new(1, 1),
            range_change: Decimal::new(1, 2),
            crossed_spread_tolerance: Decimal::ZERO,
        }
    }
}

/// Polling period of each harvest loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPeriods {
    pub depth: Duration,
    pub chart: Duration,
    pub tape: Duration,
    pub candles: Duration,
    pub quotes: Duration,
}

impl Default for LoopPeriods {
    fn default() -> Self {
        Self {
            depth: Duration::from_millis(100),
            chart: Duration::from_millis(1000),
            tape: Duration::from_millis(100),
            candles: Duration::from_millis(1000),
            quotes: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveUpdateConfig {
    /// Delay between engine bootstrap and the first harvest tick.
    pub initial_pause: Duration,
    pub periods: LoopPeriods,
    /// Fills kept per pair on the tape.
    pub tape_capacity: usize,
    pub chart: ChartConfig,
    pub internal_volume_factor: Decimal,
    /// Scales external-venue volume onto the internal scale.
    pub external_volume_factor: Decimal,
}

impl Default for LiveUpdateConfig {
    fn default() -> Self {
        Self {
            initial_pause: Duration::from_secs(10),
            periods: LoopPeriods::default(),
            tape_capacity: 200,
            chart: ChartConfig::default(),
            internal_volume_factor: Decimal::ONE,
            external_volume_factor: Decimal::new(11, 2),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_decimal(name: &str, default: Decimal) -> Decimal {
    env::var(name)
        .ok()
        .and_then(|s| Decimal::from_str(s.trim()).ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_u64(name, default.as_millis() as u64))
}

impl LiveUpdateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let periods = defaults.periods;
        let chart = defaults.chart;

        Self {
            initial_pause: env_millis("LIVE_UPDATE_INITIAL_PAUSE_MS", defaults.initial_pause),
            periods: LoopPeriods {
                depth: env_millis("LIVE_UPDATE_DEPTH_MS", periods.depth),
                chart: env_millis("LIVE_UPDATE_CHART_MS", periods.chart),
                tape: env_millis("LIVE_UPDATE_TAPE_MS", periods.tape),
                candles: env_millis("LIVE_UPDATE_CANDLES_MS", periods.candles),
                quotes: env_millis("LIVE_UPDATE_QUOTES_MS", periods.quotes),
            },
            tape_capacity: env_usize("LIVE_UPDATE_TAPE_CAPACITY", defaults.tape_capacity),
            chart: ChartConfig {
                bucket_limit: env_usize("LIVE_UPDATE_CHART_BUCKETS", chart.bucket_limit),
                visible_range: env_decimal("LIVE_UPDATE_CHART_RANGE", chart.visible_range),
                range_change: env_decimal("LIVE_UPDATE_CHART_RANGE_CHANGE", chart.range_change),
                crossed_spread_tolerance: env_decimal(
                    "LIVE_UPDATE_CHART_CROSSED_TOLERANCE",
                    chart.crossed_spread_tolerance,
                ),
            },
            internal_volume_factor: defaults.internal_volume_factor,
            external_volume_factor: env_decimal(
                "LIVE_UPDATE_EXTERNAL_VOLUME_FACTOR",
                defaults.external_volume_factor,
            ),
        }
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        let periods = [
            ("depth", self.periods.depth),
            ("chart", self.periods.chart),
            ("tape", self.periods.tape),
            ("candles", self.periods.candles),
            ("quotes", self.periods.quotes),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(BootstrapError::InvalidConfig(format!("{name} period is zero")));
            }
        }
        if self.tape_capacity == 0 {
            return Err(BootstrapError::InvalidConfig("tape capacity is zero".into()));
        }
        // Merging needs a protected best bucket plus one pair.
        if self.chart.bucket_limit < 3 {
            return Err(BootstrapError::InvalidConfig(format!(
                "chart bucket limit {} is below 3",
                self.chart.bucket_limit
            )));
        }
        if self.chart.visible_range <= Decimal::ZERO || self.chart.visible_range >= Decimal::ONE {
            return Err(BootstrapError::InvalidConfig(format!(
                "chart visible range {} outside (0, 1)",
                self.chart.visible_range
            )));
        }
        if self.external_volume_factor <= Decimal::ZERO || self.internal_volume_factor <= Decimal::ZERO {
            return Err(BootstrapError::InvalidConfig("volume factor must be positive".into()));
        }
        Ok(())
    }

    pub fn volume_factor(&self, is_internal: bool) -> Decimal {
        if is_internal {
            self.internal_volume_factor
        } else {
            self.external_volume_factor
        }
    }
}
