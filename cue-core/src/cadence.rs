//! How often a child redraws.
//!
//! Extrapolation is smooth between snapshots, so a child only needs a fast
//! refresh right after something visible changed. Anything interesting
//! opens a boost window; outside it the child drops to the normal rate,
//! and to the low-power rate whenever the display is power constrained.

use std::time::{Duration, Instant};

use crate::reconciler::IngestReport;

/// Refresh rates and the boost window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceConfig {
    /// How long a boost lasts after the last trigger.
    pub boost_window: Duration,
    /// Rate during a boost.
    pub boost_hz: u32,
    /// Rate outside a boost.
    pub normal_hz: u32,
    /// Rate while power constrained.
    pub low_power_hz: u32,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            boost_window: Duration::from_secs(6),
            boost_hz: 50,
            normal_hz: 10,
            low_power_hz: 1,
        }
    }
}

/// Display power state reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PowerState {
    /// Normal operation.
    #[default]
    Active,
    /// Backgrounded, ambient mode, or battery saver.
    Constrained,
}

/// Boost tracking for one child.
#[derive(Debug, Clone, Default)]
pub struct RenderCadence {
    config: CadenceConfig,
    boost_until: Option<Instant>,
}

impl RenderCadence {
    /// Create a cadence with no boost active.
    pub fn new(config: CadenceConfig) -> Self {
        Self {
            config,
            boost_until: None,
        }
    }

    /// Open (or extend) a boost window from `now`.
    pub fn boost(&mut self, now: Instant) {
        self.boost_until = Some(now + self.config.boost_window);
    }

    /// Boost if the snapshot changed something visible. Returns whether it
    /// did.
    pub fn observe(&mut self, report: &IngestReport, now: Instant) -> bool {
        let trigger = report.phase_changed || report.sequence_jumped || report.recovered;
        if trigger {
            self.boost(now);
        }
        trigger
    }

    /// Whether a boost window is open at `now`.
    pub fn is_boosted(&self, now: Instant) -> bool {
        self.boost_until.is_some_and(|until| now < until)
    }

    /// Refresh rate at `now`.
    pub fn rate_hz(&self, now: Instant, power: PowerState) -> u32 {
        match power {
            PowerState::Constrained => self.config.low_power_hz,
            PowerState::Active if self.is_boosted(now) => self.config.boost_hz,
            PowerState::Active => self.config.normal_hz,
        }
    }

    /// Time until the next redraw.
    pub fn interval(&self, now: Instant, power: PowerState) -> Duration {
        let hz = self.rate_hz(now, power).max(1);
        Duration::from_secs(1) / hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> IngestReport {
        IngestReport {
            phase_changed: true,
            ..IngestReport::default()
        }
    }

    #[test]
    fn normal_rate_without_triggers() {
        let now = Instant::now();
        let cadence = RenderCadence::default();
        assert_eq!(cadence.rate_hz(now, PowerState::Active), 10);
        assert_eq!(
            cadence.interval(now, PowerState::Active),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn each_trigger_opens_a_boost() {
        let now = Instant::now();
        for report in [
            trigger(),
            IngestReport {
                sequence_jumped: true,
                ..IngestReport::default()
            },
            IngestReport {
                recovered: true,
                ..IngestReport::default()
            },
        ] {
            let mut cadence = RenderCadence::default();
            assert!(cadence.observe(&report, now));
            assert_eq!(cadence.rate_hz(now, PowerState::Active), 50);
        }
    }

    #[test]
    fn plain_snapshot_does_not_boost() {
        let now = Instant::now();
        let mut cadence = RenderCadence::default();
        assert!(!cadence.observe(&IngestReport::default(), now));
        assert!(!cadence.is_boosted(now));
    }

    #[test]
    fn boost_expires_after_window() {
        let now = Instant::now();
        let mut cadence = RenderCadence::default();
        cadence.observe(&trigger(), now);
        assert!(cadence.is_boosted(now + Duration::from_millis(5_900)));
        assert!(!cadence.is_boosted(now + Duration::from_secs(6)));
        assert_eq!(
            cadence.interval(now + Duration::from_secs(7), PowerState::Active),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn new_trigger_extends_the_window() {
        let now = Instant::now();
        let mut cadence = RenderCadence::default();
        cadence.observe(&trigger(), now);
        cadence.observe(&trigger(), now + Duration::from_secs(5));
        assert!(cadence.is_boosted(now + Duration::from_secs(10)));
    }

    #[test]
    fn low_power_wins_over_boost() {
        let now = Instant::now();
        let mut cadence = RenderCadence::default();
        cadence.observe(&trigger(), now);
        assert_eq!(cadence.rate_hz(now, PowerState::Constrained), 1);
        assert_eq!(
            cadence.interval(now, PowerState::Constrained),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn zero_rate_is_treated_as_one() {
        let now = Instant::now();
        let cadence = RenderCadence::new(CadenceConfig {
            low_power_hz: 0,
            ..CadenceConfig::default()
        });
        assert_eq!(
            cadence.interval(now, PowerState::Constrained),
            Duration::from_secs(1)
        );
    }
}
