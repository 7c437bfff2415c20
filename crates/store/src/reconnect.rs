//! Delay schedule for reconnecting to the durable backend after a fallback to
//! memory.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Wait before the first attempt.
    pub initial_delay: Duration,
    /// Ceiling the wait settles at.
    pub max_delay: Duration,
    /// Growth factor per failed attempt. Values below 1 are treated as 1.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Start at `initial` and otherwise use the defaults.
    pub fn starting_at(initial: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: Duration::from_secs(30).max(initial),
            ..Default::default()
        }
    }

    /// The endless sequence of waits between attempts.
    pub fn schedule(&self) -> ReconnectSchedule {
        ReconnectSchedule {
            upcoming: self.initial_delay.min(self.max_delay),
            growth: self.multiplier.max(1.0),
            ceiling: self.max_delay,
        }
    }
}

/// Iterator over reconnect waits. Never ends.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    upcoming: Duration,
    growth: f64,
    ceiling: Duration,
}

impl Iterator for ReconnectSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.upcoming;
        self.upcoming = Duration::try_from_secs_f64(current.as_secs_f64() * self.growth)
            .map_or(self.ceiling, |grown| grown.min(self.ceiling));
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(schedule: ReconnectSchedule, n: usize) -> Vec<u128> {
        schedule.take(n).map(|d| d.as_millis()).collect()
    }

    #[test]
    fn shrinking_multiplier_holds_the_wait_steady() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            multiplier: 0.25,
            ..Default::default()
        };
        assert_eq!(millis(config.schedule(), 3), vec![500, 500, 500]);
    }

    #[test]
    fn runaway_multiplier_settles_at_ceiling() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(80),
            multiplier: f64::MAX,
        };
        assert_eq!(millis(config.schedule(), 3), vec![5, 80, 80]);
    }

    #[test]
    fn initial_above_ceiling_is_capped() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(90),
            ..Default::default()
        };
        assert_eq!(config.schedule().next(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn starting_at_keeps_max_above_initial() {
        let config = ReconnectConfig::starting_at(Duration::from_secs(60));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert_eq!(config.schedule().nth(4), Some(Duration::from_secs(60)));
    }
}
