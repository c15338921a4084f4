//! Receiver-side prediction.
//!
//! A child never runs its own timer. It keeps the last snapshot it trusted
//! and extrapolates from it:
//!
//! ```text
//! value(at) = max(0, base_value + velocity * (at - base_timestamp))
//! ```
//!
//! Velocity is measured from consecutive snapshots when possible and falls
//! back to what the phase implies. The [`Reconciler`] also tracks
//! staleness (with hysteresis), asks for snapshots while stale, and turns
//! the flash counter into at-most-once flash windows.
//!
//! The render loop never touches the reconciler. It gets an immutable
//! [`Prediction`] value and evaluates it as often as it likes.

use std::time::{Duration, Instant};

use cue_types::{Envelope, FlashStyle, Phase, Rgb, SessionId};

/// Tunables for the reconciler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerConfig {
    /// A stale view becomes fresh once the last snapshot is at most this old.
    pub fresh_threshold: Duration,
    /// A fresh view becomes stale once the last snapshot is older than this.
    pub stale_threshold: Duration,
    /// Minimum spacing of snapshot requests while stale.
    pub request_cooldown: Duration,
    /// Measured velocities slower than this (in seconds per second) are
    /// treated as noise.
    pub noise_threshold: f64,
    /// Largest velocity magnitude accepted.
    pub velocity_clamp: f64,
    /// Half-period of the blink flash style.
    pub blink_period: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            fresh_threshold: Duration::from_secs(1),
            stale_threshold: Duration::from_secs(4),
            request_cooldown: Duration::from_millis(600),
            noise_threshold: 0.2,
            velocity_clamp: 1.05,
            blink_period: Duration::from_millis(150),
        }
    }
}

/// What one snapshot changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// A new flash edge was seen; a flash window opened.
    pub flash: bool,
    /// The phase differs from the previous snapshot (or this is the first).
    pub phase_changed: bool,
    /// The sequence skipped ahead or went backwards. A repeat of the
    /// previous sequence (an on-demand snapshot) is not a jump.
    pub sequence_jumped: bool,
    /// The view went from stale to fresh.
    pub recovered: bool,
}

/// What a staleness check decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Staleness flipped in this poll.
    pub stale_changed: bool,
    /// The caller should send a snapshot request now.
    pub request_snapshot: bool,
}

/// How to draw a flash at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlashDescriptor {
    /// Style the parent asked for.
    pub style: FlashStyle,
    /// Color to draw.
    pub color: Rgb,
    /// Fraction of the window already elapsed, in `[0, 1)`.
    pub progress: f64,
    /// Whether the flash is visibly on right now.
    pub lit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FlashWindow {
    opened_at: Instant,
    duration: Duration,
    style: FlashStyle,
    color: Rgb,
}

impl FlashWindow {
    fn describe(&self, at: Instant, blink_period: Duration) -> Option<FlashDescriptor> {
        let since = at.checked_duration_since(self.opened_at)?;
        if since >= self.duration {
            return None;
        }

        let lit = match self.style {
            FlashStyle::Off => return None,
            FlashStyle::Solid | FlashStyle::Unknown => true,
            FlashStyle::Blink => {
                let period = blink_period.as_nanos().max(1);
                (since.as_nanos() / period) % 2 == 0
            }
            // Haptic pulses are played by the device, nothing is drawn.
            FlashStyle::Haptic => false,
        };

        Some(FlashDescriptor {
            style: self.style,
            color: self.color,
            progress: since.as_secs_f64() / self.duration.as_secs_f64(),
            lit,
        })
    }
}

/// An immutable extrapolation, cheap to copy into a render loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    base_value: f64,
    base_timestamp: Instant,
    velocity: f64,
    stop_base: f64,
    stop_velocity: f64,
    phase: Phase,
    stop_active: bool,
    show_hours: bool,
    stale: bool,
    flash: Option<FlashWindow>,
    blink_period: Duration,
}

impl Prediction {
    fn since_base(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.base_timestamp)
            .as_secs_f64()
    }

    /// Main value (countdown remaining or elapsed) at `at`.
    pub fn current_main_value(&self, at: Instant) -> f64 {
        (self.base_value + self.velocity * self.since_base(at)).max(0.0)
    }

    /// Remaining stop hold at `at`.
    pub fn current_stop_value(&self, at: Instant) -> f64 {
        (self.stop_base + self.stop_velocity * self.since_base(at)).max(0.0)
    }

    /// Flash to draw at `at`, if a window is open.
    pub fn active_flash(&self, at: Instant) -> Option<FlashDescriptor> {
        self.flash?.describe(at, self.blink_period)
    }

    /// Whether the snapshot this is built on is too old to trust.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Phase of the last snapshot.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a stop hold was active in the last snapshot.
    pub fn stop_active(&self) -> bool {
        self.stop_active
    }

    /// Display hint from the parent.
    pub fn show_hours(&self) -> bool {
        self.show_hours
    }

    /// Extrapolation rate in seconds per second.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    at: Instant,
    phase: Phase,
    counting: bool,
}

/// Per-child prediction state.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconcilerConfig,
    prediction: Option<Prediction>,
    previous: Option<Sample>,
    session: Option<SessionId>,
    last_snapshot_at: Option<Instant>,
    stale: bool,
    last_seen_flash_seq: u64,
    last_seen_action_seq: Option<u64>,
    last_sequence: Option<u64>,
    last_phase: Option<Phase>,
    last_request_at: Option<Instant>,
}

impl Reconciler {
    /// Create a reconciler. It starts stale: nothing has been received.
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            prediction: None,
            previous: None,
            session: None,
            last_snapshot_at: None,
            stale: true,
            last_seen_flash_seq: 0,
            last_seen_action_seq: None,
            last_sequence: None,
            last_phase: None,
            last_request_at: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// The current prediction, once a snapshot has arrived.
    pub fn prediction(&self) -> Option<Prediction> {
        self.prediction
    }

    /// Whether the view is stale.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Session of the parent last heard from.
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Main value at `at`, zero before the first snapshot.
    pub fn current_main_value(&self, at: Instant) -> f64 {
        self.prediction
            .map_or(0.0, |p| p.current_main_value(at))
    }

    /// Stop hold remaining at `at`, zero before the first snapshot.
    pub fn current_stop_value(&self, at: Instant) -> f64 {
        self.prediction
            .map_or(0.0, |p| p.current_stop_value(at))
    }

    /// Flash to draw at `at`.
    pub fn active_flash(&self, at: Instant) -> Option<FlashDescriptor> {
        self.prediction.and_then(|p| p.active_flash(at))
    }

    fn reset_trackers(&mut self) {
        self.previous = None;
        self.last_seen_flash_seq = 0;
        self.last_seen_action_seq = None;
        self.last_sequence = None;
        self.last_phase = None;
        if let Some(prediction) = self.prediction.as_mut() {
            prediction.flash = None;
        }
    }

    /// Take in a snapshot received at `now`.
    pub fn ingest(&mut self, envelope: &Envelope, now: Instant) -> IngestReport {
        if envelope.session.is_some() && envelope.session != self.session {
            self.reset_trackers();
            self.session = envelope.session;
        }

        let counting = envelope.is_counting();
        let velocity = if counting {
            self.measure_velocity(envelope, now)
        } else {
            0.0
        };
        let stop_velocity = if envelope.stop_active && envelope.phase == Phase::Running {
            -1.0
        } else {
            0.0
        };

        let flash = self.detect_flash(envelope);
        let flash_window = if flash {
            Some(FlashWindow {
                opened_at: now,
                duration: Duration::from_millis(u64::from(envelope.flash_duration_ms)),
                style: envelope.flash_style,
                color: envelope.flash_color,
            })
        } else {
            self.prediction.and_then(|p| p.flash)
        };

        let report = IngestReport {
            flash,
            phase_changed: self.last_phase != Some(envelope.phase),
            sequence_jumped: self.last_sequence.is_some_and(|last| {
                envelope.sequence != last && envelope.sequence != last.wrapping_add(1)
            }),
            recovered: self.stale,
        };

        self.stale = false;
        self.last_snapshot_at = Some(now);
        self.last_phase = Some(envelope.phase);
        self.last_sequence = Some(envelope.sequence);
        self.previous = Some(Sample {
            value: envelope.remaining,
            at: now,
            phase: envelope.phase,
            counting,
        });
        self.prediction = Some(Prediction {
            base_value: envelope.remaining,
            base_timestamp: now,
            velocity,
            stop_base: envelope.stop_remaining,
            stop_velocity,
            phase: envelope.phase,
            stop_active: envelope.stop_active,
            show_hours: envelope.show_hours,
            stale: false,
            flash: flash_window,
            blink_period: self.config.blink_period,
        });

        report
    }

    fn measure_velocity(&self, envelope: &Envelope, now: Instant) -> f64 {
        let implied = envelope.phase.implied_velocity();
        let measured = self
            .previous
            .filter(|prev| prev.counting && prev.phase == envelope.phase)
            .and_then(|prev| {
                let dt = now.saturating_duration_since(prev.at).as_secs_f64();
                (dt > 0.0).then(|| (envelope.remaining - prev.value) / dt)
            });

        let velocity = match measured {
            Some(v) if v.abs() >= self.config.noise_threshold => v,
            _ => implied,
        };
        velocity.clamp(-self.config.velocity_clamp, self.config.velocity_clamp)
    }

    fn detect_flash(&mut self, envelope: &Envelope) -> bool {
        let fired = match envelope.flash_seq {
            Some(seq) if seq > self.last_seen_flash_seq => {
                self.last_seen_flash_seq = seq;
                true
            }
            Some(_) => false,
            // Older parents only send an edge flag next to the action counter.
            None => {
                envelope.flash == Some(true)
                    && envelope.action_seq.is_some_and(|seq| {
                        self.last_seen_action_seq.map_or(true, |last| seq > last)
                    })
            }
        };
        if let Some(seq) = envelope.action_seq {
            self.last_seen_action_seq = Some(seq);
        }
        fired
    }

    /// Re-evaluate staleness at `now`.
    pub fn poll(&mut self, now: Instant) -> PollReport {
        let was_stale = self.stale;
        if let Some(last) = self.last_snapshot_at {
            let age = now.saturating_duration_since(last);
            if self.stale {
                if age <= self.config.fresh_threshold {
                    self.stale = false;
                }
            } else if age > self.config.stale_threshold {
                self.stale = true;
            }
        }
        if let Some(prediction) = self.prediction.as_mut() {
            prediction.stale = self.stale;
        }

        let request_snapshot = self.stale
            && self.last_request_at.map_or(true, |at| {
                now.saturating_duration_since(at) >= self.config.request_cooldown
            });
        if request_snapshot {
            self.last_request_at = Some(now);
        }

        PollReport {
            stale_changed: was_stale != self.stale,
            request_snapshot,
        }
    }

    /// Distrust the current view regardless of its age, e.g. once the
    /// parent is known to be gone. Only the next snapshot clears it.
    /// Returns whether staleness flipped.
    pub fn mark_stale(&mut self) -> bool {
        let was_stale = self.stale;
        self.stale = true;
        self.last_snapshot_at = None;
        if let Some(prediction) = self.prediction.as_mut() {
            prediction.stale = true;
        }
        !was_stale
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}
