//! Canonical timer state machine, owned by the parent.
//!
//! This module provides a pure, side-effect-free state machine for the
//! timer itself. Time only moves when the caller passes in a monotonic
//! [`Instant`]: [`TimerMachine::tick`] advances the clock, user actions
//! settle the clock to `now` and then transition.
//!
//! ```text
//! Idle --start(d>0)--> Countdown --reaches 0--> Running
//! Idle --start(0)----> Running
//! Countdown/Running --pause--> Paused --resume--> Countdown | Running
//! Idle/Paused --reset--> Idle
//! ```
//!
//! Broadcasting is not done here. The caller publishes an [`Envelope`]
//! after every tick and after every applied action.

use std::collections::VecDeque;
use std::time::Instant;

use cue_types::{
    CueEvent, Envelope, FlashStyle, LinkKind, Phase, RestartEvent, Rgb, Role, SessionId,
    StopEvent, DEFAULT_FLASH_DURATION_MS, PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};

use crate::input::{Seconds, UserAction};

/// Slack for comparing accumulated floating-point seconds.
const TIME_EPSILON: f64 = 1e-9;

/// What `pause` does while counting down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountdownPausePolicy {
    /// Keep the remaining countdown and enter Paused.
    #[default]
    Failsafe,
    /// Restore the original countdown length and return to Idle.
    ResetToIdle,
}

/// Flash settings carried on every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashConfig {
    /// Rendering style.
    pub style: FlashStyle,
    /// Window length in milliseconds.
    pub duration_ms: u32,
    /// Flash color.
    pub color: Rgb,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            style: FlashStyle::Solid,
            duration_ms: DEFAULT_FLASH_DURATION_MS,
            color: Rgb::WHITE,
        }
    }
}

/// Result of a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// State changed; the caller should broadcast.
    Applied,
    /// Not legal in the current phase; nothing changed.
    Rejected,
}

impl ActionOutcome {
    /// Check if the action changed state.
    pub fn is_applied(self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }
}

/// Something that happened while time advanced.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    /// Countdown reached zero and the timer started running.
    CountdownFinished,
    /// A stop event was consumed and its hold began.
    StopFired(StopEvent),
    /// A stop hold ended and elapsed time resumed.
    StopReleased,
}

/// The parent's timer. Single writer: only the parent's tick/action loop
/// touches it.
#[derive(Debug, Clone)]
pub struct TimerMachine {
    session: SessionId,
    policy: CountdownPausePolicy,
    phase: Phase,
    countdown_duration: f64,
    countdown_remaining: f64,
    elapsed: f64,
    /// Last instant accounted for. Only set while Countdown or Running.
    anchor: Option<Instant>,
    stop_queue: VecDeque<StopEvent>,
    cue_events: Vec<CueEvent>,
    restart_events: Vec<RestartEvent>,
    stop_active: bool,
    stop_remaining: f64,
    action_seq: u64,
    state_seq: u64,
    flash_seq: u64,
    flash: FlashConfig,
    show_hours: bool,
    /// Events produced while settling the clock inside an action.
    pending: Vec<TimerEvent>,
}

impl TimerMachine {
    /// Create an idle timer with a fresh session.
    pub fn new(policy: CountdownPausePolicy) -> Self {
        Self {
            session: SessionId::new(),
            policy,
            phase: Phase::Idle,
            countdown_duration: 0.0,
            countdown_remaining: 0.0,
            elapsed: 0.0,
            anchor: None,
            stop_queue: VecDeque::new(),
            cue_events: Vec::new(),
            restart_events: Vec::new(),
            stop_active: false,
            stop_remaining: 0.0,
            action_seq: 0,
            state_seq: 0,
            flash_seq: 0,
            flash: FlashConfig::default(),
            show_hours: false,
            pending: Vec::new(),
        }
    }

    /// Set the flash settings (builder style).
    pub fn with_flash(mut self, flash: FlashConfig) -> Self {
        self.flash = flash;
        self
    }

    /// Set the hours display hint (builder style).
    pub fn with_show_hours(mut self, show_hours: bool) -> Self {
        self.show_hours = show_hours;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Session identifier.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Configured countdown pause policy.
    pub fn policy(&self) -> CountdownPausePolicy {
        self.policy
    }

    /// Elapsed running seconds.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Seconds of countdown left.
    pub fn countdown_remaining(&self) -> f64 {
        self.countdown_remaining
    }

    /// Whether a stop hold is in progress.
    pub fn stop_active(&self) -> bool {
        self.stop_active
    }

    /// Seconds left in the current stop hold.
    pub fn stop_remaining(&self) -> f64 {
        self.stop_remaining
    }

    /// Pending stop events, ascending by offset.
    pub fn stop_queue(&self) -> impl Iterator<Item = &StopEvent> {
        self.stop_queue.iter()
    }

    /// Cue markers, ascending by offset.
    pub fn cue_events(&self) -> &[CueEvent] {
        &self.cue_events
    }

    /// Restart markers, ascending by offset.
    pub fn restart_events(&self) -> &[RestartEvent] {
        &self.restart_events
    }

    /// User-action counter.
    pub fn action_seq(&self) -> u64 {
        self.action_seq
    }

    /// Broadcast counter.
    pub fn state_seq(&self) -> u64 {
        self.state_seq
    }

    /// Flash edge counter.
    pub fn flash_seq(&self) -> u64 {
        self.flash_seq
    }

    /// The displayed main value: countdown while any remains, else elapsed.
    pub fn main_value(&self) -> f64 {
        if self.countdown_remaining > 0.0 {
            self.countdown_remaining
        } else {
            self.elapsed
        }
    }

    // ── Time ─────────────────────────────────────────────────────────

    /// Advance the clock to `now`.
    ///
    /// Returns what happened since the previous tick, including events
    /// produced while actions settled the clock.
    pub fn tick(&mut self, now: Instant) -> Vec<TimerEvent> {
        self.settle(now);
        std::mem::take(&mut self.pending)
    }

    fn settle(&mut self, now: Instant) {
        let Some(anchor) = self.anchor else {
            return;
        };
        let dt = now.saturating_duration_since(anchor).as_secs_f64();
        self.anchor = Some(anchor.max(now));

        match self.phase {
            Phase::Countdown => self.advance_countdown(dt, now),
            Phase::Running => self.advance_running(dt),
            Phase::Idle | Phase::Paused | Phase::Unknown => {}
        }
    }

    fn advance_countdown(&mut self, dt: f64, now: Instant) {
        self.countdown_remaining -= dt;
        if self.countdown_remaining > TIME_EPSILON {
            return;
        }

        // Overshoot past zero is dropped: the run starts at `now`.
        self.countdown_remaining = 0.0;
        self.phase = Phase::Running;
        self.elapsed = 0.0;
        self.anchor = Some(now);
        self.flash_seq += 1;
        self.pending.push(TimerEvent::CountdownFinished);

        // Stops scheduled at offset zero fire right away.
        self.advance_running(0.0);
    }

    /// Spend `dt` seconds: an active hold consumes time first, then elapsed
    /// moves. Crossing a stop pins elapsed to the stop's offset and starts
    /// its hold with whatever budget is left, so several crossings in one
    /// tick all fire, in order.
    fn advance_running(&mut self, dt: f64) {
        let mut budget = dt;
        loop {
            if self.stop_active {
                if self.stop_remaining - budget > TIME_EPSILON {
                    self.stop_remaining -= budget;
                    return;
                }
                budget = (budget - self.stop_remaining).max(0.0);
                self.stop_remaining = 0.0;
                self.stop_active = false;
                self.pending.push(TimerEvent::StopReleased);
            }

            let crosses = self
                .stop_queue
                .front()
                .is_some_and(|next| next.fire_offset <= self.elapsed + budget + TIME_EPSILON);
            if !crosses {
                self.elapsed += budget;
                return;
            }

            let Some(stop) = self.stop_queue.pop_front() else {
                return;
            };
            let reach = (stop.fire_offset - self.elapsed).max(0.0);
            budget = (budget - reach).max(0.0);
            self.elapsed = self.elapsed.max(stop.fire_offset);
            self.stop_active = true;
            self.stop_remaining = stop.hold_duration;
            self.flash_seq += 1;
            self.pending.push(TimerEvent::StopFired(stop));
        }
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Apply a validated user action.
    pub fn apply(&mut self, action: &UserAction, now: Instant) -> ActionOutcome {
        match action {
            UserAction::Start(duration) => self.start(*duration, now),
            UserAction::Pause => self.pause(now),
            UserAction::Resume => self.resume(now),
            UserAction::Reset => self.reset(),
            UserAction::AddStop { fire_offset, hold } => self.add_stop_event(*fire_offset, *hold),
            UserAction::AddCue {
                fire_offset,
                asset_id,
            } => self.add_cue_event(*fire_offset, asset_id.clone()),
            UserAction::AddRestart(fire_offset) => self.add_restart_event(*fire_offset),
            UserAction::Flash => self.trigger_flash(),
        }
    }

    /// Start from Idle. A zero duration skips the countdown.
    pub fn start(&mut self, duration: Seconds, now: Instant) -> ActionOutcome {
        if self.phase != Phase::Idle {
            return ActionOutcome::Rejected;
        }

        let duration = duration.get();
        self.countdown_duration = duration;
        self.elapsed = 0.0;
        self.stop_active = false;
        self.stop_remaining = 0.0;
        if duration > 0.0 {
            self.phase = Phase::Countdown;
            self.countdown_remaining = duration;
        } else {
            self.phase = Phase::Running;
            self.countdown_remaining = 0.0;
        }
        self.anchor = Some(now);
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Pause a counting timer.
    pub fn pause(&mut self, now: Instant) -> ActionOutcome {
        self.settle(now);
        match (self.phase, self.policy) {
            (Phase::Countdown, CountdownPausePolicy::ResetToIdle) => {
                self.phase = Phase::Idle;
                self.countdown_remaining = self.countdown_duration;
            }
            (Phase::Countdown | Phase::Running, _) => {
                self.phase = Phase::Paused;
            }
            _ => return ActionOutcome::Rejected,
        }
        self.anchor = None;
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Resume from Paused into whichever phase was interrupted.
    pub fn resume(&mut self, now: Instant) -> ActionOutcome {
        if self.phase != Phase::Paused {
            return ActionOutcome::Rejected;
        }
        self.phase = if self.countdown_remaining > 0.0 {
            Phase::Countdown
        } else {
            Phase::Running
        };
        self.anchor = Some(now);
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Clear everything and return to Idle. Only legal from Idle or Paused.
    pub fn reset(&mut self) -> ActionOutcome {
        if !matches!(self.phase, Phase::Idle | Phase::Paused) {
            return ActionOutcome::Rejected;
        }
        self.phase = Phase::Idle;
        self.countdown_duration = 0.0;
        self.countdown_remaining = 0.0;
        self.elapsed = 0.0;
        self.anchor = None;
        self.stop_queue.clear();
        self.cue_events.clear();
        self.restart_events.clear();
        self.stop_active = false;
        self.stop_remaining = 0.0;
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Schedule a stop-and-hold. Rejected if a stop at the same offset is
    /// already queued.
    pub fn add_stop_event(&mut self, fire_offset: Seconds, hold: Seconds) -> ActionOutcome {
        let fire_offset = fire_offset.get();
        let at = self
            .stop_queue
            .partition_point(|e| e.fire_offset < fire_offset);
        if self
            .stop_queue
            .get(at)
            .is_some_and(|e| e.fire_offset == fire_offset)
        {
            return ActionOutcome::Rejected;
        }
        self.stop_queue
            .insert(at, StopEvent::new(fire_offset, hold.get()));
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Add a cue marker.
    pub fn add_cue_event(&mut self, fire_offset: Seconds, asset_id: Option<String>) -> ActionOutcome {
        let fire_offset = fire_offset.get();
        let at = self
            .cue_events
            .partition_point(|e| e.fire_offset <= fire_offset);
        self.cue_events.insert(
            at,
            CueEvent {
                fire_offset,
                asset_id,
            },
        );
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Add a restart marker.
    pub fn add_restart_event(&mut self, fire_offset: Seconds) -> ActionOutcome {
        let fire_offset = fire_offset.get();
        let at = self
            .restart_events
            .partition_point(|e| e.fire_offset <= fire_offset);
        self.restart_events
            .insert(at, RestartEvent::new(fire_offset));
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Fire a manual flash on every receiver.
    pub fn trigger_flash(&mut self) -> ActionOutcome {
        self.flash_seq += 1;
        self.action_seq += 1;
        ActionOutcome::Applied
    }

    /// Change the flash settings carried on future envelopes.
    pub fn set_flash(&mut self, flash: FlashConfig) {
        self.flash = flash;
    }

    /// Change the hours display hint.
    pub fn set_show_hours(&mut self, show_hours: bool) {
        self.show_hours = show_hours;
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Count one broadcast and build its envelope.
    pub fn publish(&mut self) -> Envelope {
        self.state_seq += 1;
        self.snapshot()
    }

    /// Build an envelope of the current state without counting a broadcast.
    pub fn snapshot(&self) -> Envelope {
        Envelope {
            version: PROTOCOL_VERSION,
            session: Some(self.session),
            sequence: self.state_seq,
            action_seq: Some(self.action_seq),
            phase: self.phase,
            remaining: self.main_value(),
            stop_events: self.stop_queue.iter().copied().collect(),
            cue_events: self.cue_events.clone(),
            restart_events: self.restart_events.clone(),
            stop_active: self.stop_active,
            stop_remaining: self.stop_remaining,
            flash_seq: Some(self.flash_seq),
            flash: None,
            flash_style: self.flash.style,
            flash_duration_ms: self.flash.duration_ms,
            flash_color: self.flash.color,
            show_hours: self.show_hours,
            role: Role::Parent,
            link: LinkKind::Stream,
        }
    }
}

impl Default for TimerMachine {
    fn default() -> Self {
        Self::new(CountdownPausePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(value: f64) -> Seconds {
        Seconds::new(value).unwrap()
    }

    fn at(t0: Instant, seconds: f64) -> Instant {
        t0 + Duration::from_secs_f64(seconds)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn running(t0: Instant) -> TimerMachine {
        let mut machine = TimerMachine::default();
        assert!(machine.start(Seconds::ZERO, t0).is_applied());
        machine
    }

    // ===========================================
    // Start / Countdown
    // ===========================================

    #[test]
    fn starts_idle() {
        let machine = TimerMachine::default();
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(machine.main_value(), 0.0);
        assert_eq!(machine.action_seq(), 0);
    }

    #[test]
    fn start_with_duration_enters_countdown() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        assert!(machine.start(secs(5.0), t0).is_applied());
        assert_eq!(machine.phase(), Phase::Countdown);
        assert_eq!(machine.countdown_remaining(), 5.0);
        assert_eq!(machine.action_seq(), 1);
    }

    #[test]
    fn start_with_zero_enters_running() {
        let t0 = Instant::now();
        let machine = running(t0);
        assert_eq!(machine.phase(), Phase::Running);
        assert_eq!(machine.elapsed(), 0.0);
    }

    #[test]
    fn start_is_rejected_outside_idle() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        let before = machine.action_seq();
        assert_eq!(machine.start(secs(3.0), t0), ActionOutcome::Rejected);
        assert_eq!(machine.action_seq(), before);
    }

    #[test]
    fn countdown_decrements_each_tick() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        machine.start(secs(5.0), t0);
        machine.tick(at(t0, 0.5));
        machine.tick(at(t0, 1.0));
        machine.tick(at(t0, 1.5));
        assert!(approx(machine.countdown_remaining(), 3.5));
        assert!(approx(machine.main_value(), 3.5));
    }

    #[test]
    fn countdown_reaching_zero_starts_running_and_flashes() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        machine.start(secs(1.0), t0);
        let flash_before = machine.flash_seq();

        let events = machine.tick(at(t0, 1.2));
        assert_eq!(events, vec![TimerEvent::CountdownFinished]);
        assert_eq!(machine.phase(), Phase::Running);
        assert_eq!(machine.elapsed(), 0.0);
        assert_eq!(machine.flash_seq(), flash_before + 1);

        // The anchor was reset at the transition, overshoot is dropped.
        machine.tick(at(t0, 1.7));
        assert!(approx(machine.elapsed(), 0.5));
    }

    // ===========================================
    // Pause / Resume
    // ===========================================

    #[test]
    fn failsafe_pause_keeps_countdown() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::new(CountdownPausePolicy::Failsafe);
        machine.start(secs(10.0), t0);
        assert!(machine.pause(at(t0, 4.0)).is_applied());
        assert_eq!(machine.phase(), Phase::Paused);
        assert!(approx(machine.countdown_remaining(), 6.0));

        // Time passing while paused changes nothing.
        machine.tick(at(t0, 9.0));
        assert!(approx(machine.countdown_remaining(), 6.0));

        assert!(machine.resume(at(t0, 9.0)).is_applied());
        assert_eq!(machine.phase(), Phase::Countdown);
        machine.tick(at(t0, 10.0));
        assert!(approx(machine.countdown_remaining(), 5.0));
    }

    #[test]
    fn non_failsafe_pause_returns_to_idle_with_full_duration() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::new(CountdownPausePolicy::ResetToIdle);
        machine.start(secs(10.0), t0);
        assert!(machine.pause(at(t0, 4.0)).is_applied());
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(machine.countdown_remaining(), 10.0);
        assert_eq!(machine.main_value(), 10.0);
    }

    #[test]
    fn pause_freezes_elapsed_and_resume_continues() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.tick(at(t0, 2.0));
        machine.pause(at(t0, 3.0));
        assert!(approx(machine.elapsed(), 3.0));

        machine.tick(at(t0, 50.0));
        assert!(approx(machine.elapsed(), 3.0));

        machine.resume(at(t0, 50.0));
        assert_eq!(machine.phase(), Phase::Running);
        machine.tick(at(t0, 51.0));
        assert!(approx(machine.elapsed(), 4.0));
    }

    #[test]
    fn pause_and_resume_rejected_in_wrong_phase() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        assert_eq!(machine.pause(t0), ActionOutcome::Rejected);
        assert_eq!(machine.resume(t0), ActionOutcome::Rejected);
        machine.start(Seconds::ZERO, t0);
        assert_eq!(machine.resume(t0), ActionOutcome::Rejected);
    }

    #[test]
    fn pause_settles_a_countdown_that_already_finished() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        machine.start(secs(1.0), t0);
        machine.pause(at(t0, 1.5));
        assert_eq!(machine.phase(), Phase::Paused);
        assert_eq!(machine.countdown_remaining(), 0.0);
        assert_eq!(
            machine.tick(at(t0, 2.0)),
            vec![TimerEvent::CountdownFinished]
        );

        machine.resume(at(t0, 2.0));
        assert_eq!(machine.phase(), Phase::Running);
    }

    // ===========================================
    // Reset
    // ===========================================

    #[test]
    fn reset_while_running_is_rejected() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(5.0), secs(1.0));
        machine.tick(at(t0, 1.0));
        let before = machine.snapshot();

        assert_eq!(machine.reset(), ActionOutcome::Rejected);
        assert_eq!(machine.snapshot(), before);
    }

    #[test]
    fn reset_while_paused_clears_everything() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(5.0), secs(1.0));
        machine.add_cue_event(secs(2.0), None);
        machine.add_restart_event(secs(8.0));
        machine.tick(at(t0, 1.0));
        machine.pause(at(t0, 1.0));

        assert!(machine.reset().is_applied());
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(machine.elapsed(), 0.0);
        assert_eq!(machine.countdown_remaining(), 0.0);
        assert!(!machine.stop_active());
        assert_eq!(machine.stop_queue().count(), 0);
        assert!(machine.cue_events().is_empty());
        assert!(machine.restart_events().is_empty());
    }

    #[test]
    fn reset_keeps_flash_counter() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        machine.trigger_flash();
        machine.trigger_flash();
        machine.start(Seconds::ZERO, t0);
        machine.pause(t0);
        machine.reset();
        assert_eq!(machine.flash_seq(), 2);
    }

    // ===========================================
    // Stop events
    // ===========================================

    #[test]
    fn stop_event_freezes_elapsed_for_its_hold() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(2.0), secs(1.0));

        for step in 1..=4 {
            machine.tick(at(t0, step as f64 * 0.5));
        }
        let envelope = machine.publish();
        assert!(envelope.stop_active);
        assert!(approx(envelope.stop_remaining, 1.0));
        assert!(approx(envelope.remaining, 2.0));

        machine.tick(at(t0, 2.5));
        assert!(approx(machine.elapsed(), 2.0));
        assert!(approx(machine.stop_remaining(), 0.5));

        let events = machine.tick(at(t0, 3.0));
        assert_eq!(events, vec![TimerEvent::StopReleased]);
        assert!(!machine.stop_active());
        assert!(approx(machine.elapsed(), 2.0));

        machine.tick(at(t0, 3.5));
        assert!(approx(machine.elapsed(), 2.5));
    }

    #[test]
    fn stop_firing_flashes_once() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(1.0), secs(1.0));
        machine.tick(at(t0, 1.5));
        assert_eq!(machine.flash_seq(), 1);
        machine.tick(at(t0, 5.0));
        assert_eq!(machine.flash_seq(), 1);
    }

    #[test]
    fn overshoot_is_spent_on_the_hold() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(2.0), secs(1.0));
        machine.tick(at(t0, 2.25));
        assert!(machine.stop_active());
        assert!(approx(machine.elapsed(), 2.0));
        assert!(approx(machine.stop_remaining(), 0.75));
    }

    #[test]
    fn one_tick_crossing_two_zero_hold_stops_fires_both_in_order() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(2.0), Seconds::ZERO);
        machine.add_stop_event(secs(1.0), Seconds::ZERO);

        let events = machine.tick(at(t0, 3.0));
        assert_eq!(
            events,
            vec![
                TimerEvent::StopFired(StopEvent::new(1.0, 0.0)),
                TimerEvent::StopReleased,
                TimerEvent::StopFired(StopEvent::new(2.0, 0.0)),
                TimerEvent::StopReleased,
            ]
        );
        assert!(approx(machine.elapsed(), 3.0));
        assert_eq!(machine.stop_queue().count(), 0);
    }

    #[test]
    fn one_tick_crossing_two_stops_with_short_hold_fires_both() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(1.0), secs(0.5));
        machine.add_stop_event(secs(1.2), secs(2.0));

        let events = machine.tick(at(t0, 2.0));
        let fired: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TimerEvent::StopFired(stop) => Some(stop.fire_offset),
                _ => None,
            })
            .collect();
        assert_eq!(fired, vec![1.0, 1.2]);
        assert!(approx(machine.elapsed(), 1.2));
        assert!(approx(machine.stop_remaining(), 2.0 - 0.3));
    }

    #[test]
    fn long_hold_defers_the_next_stop_to_a_later_tick() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(1.0), secs(5.0));
        machine.add_stop_event(secs(1.5), secs(1.0));

        let events = machine.tick(at(t0, 2.0));
        assert_eq!(events.len(), 1);
        assert_eq!(machine.stop_queue().count(), 1);

        let events = machine.tick(at(t0, 7.0));
        assert!(events.contains(&TimerEvent::StopFired(StopEvent::new(1.5, 1.0))));
    }

    #[test]
    fn stop_at_zero_fires_when_countdown_ends() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        machine.add_stop_event(Seconds::ZERO, secs(2.0));
        machine.start(secs(1.0), t0);

        let events = machine.tick(at(t0, 1.0));
        assert_eq!(events[0], TimerEvent::CountdownFinished);
        assert_eq!(events[1], TimerEvent::StopFired(StopEvent::new(0.0, 2.0)));
        assert!(machine.stop_active());
    }

    #[test]
    fn pause_freezes_stop_hold() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(1.0), secs(2.0));
        machine.tick(at(t0, 1.5));
        machine.pause(at(t0, 1.5));
        machine.tick(at(t0, 30.0));
        assert!(approx(machine.stop_remaining(), 1.5));
        machine.resume(at(t0, 30.0));
        machine.tick(at(t0, 31.0));
        assert!(approx(machine.stop_remaining(), 0.5));
    }

    #[test]
    fn stop_queue_stays_sorted_and_rejects_duplicates() {
        let mut machine = TimerMachine::default();
        machine.add_stop_event(secs(5.0), secs(1.0));
        machine.add_stop_event(secs(1.0), secs(1.0));
        machine.add_stop_event(secs(3.0), secs(1.0));
        assert_eq!(
            machine.add_stop_event(secs(3.0), secs(9.0)),
            ActionOutcome::Rejected
        );
        let offsets: Vec<f64> = machine.stop_queue().map(|e| e.fire_offset).collect();
        assert_eq!(offsets, vec![1.0, 3.0, 5.0]);
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn markers_are_sorted_and_never_consumed() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_cue_event(secs(4.0), Some("b".into()));
        machine.add_cue_event(secs(1.0), Some("a".into()));
        machine.add_restart_event(secs(3.0));
        machine.add_restart_event(secs(2.0));

        machine.tick(at(t0, 10.0));
        let envelope = machine.publish();
        let cues: Vec<f64> = envelope.cue_events.iter().map(|e| e.fire_offset).collect();
        let restarts: Vec<f64> = envelope
            .restart_events
            .iter()
            .map(|e| e.fire_offset)
            .collect();
        assert_eq!(cues, vec![1.0, 4.0]);
        assert_eq!(restarts, vec![2.0, 3.0]);
        assert_eq!(envelope.cue_events[0].asset_id.as_deref(), Some("a"));
    }

    /// Irregular tick sizes from a small deterministic generator.
    fn jittery_ticks(count: usize) -> Vec<f64> {
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        (0..count)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                // 1ms .. 700ms
                0.001 + ((state >> 33) % 700) as f64 / 1000.0
            })
            .collect()
    }

    #[test]
    fn every_stop_fires_once_in_order_under_irregular_ticks() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        let offsets = [0.5, 0.75, 3.0, 3.01, 7.0, 12.5];
        for offset in offsets {
            machine.add_stop_event(secs(offset), secs(0.4));
        }

        let mut now = 0.0;
        let mut fired = Vec::new();
        let mut last_elapsed = machine.elapsed();

        for dt in jittery_ticks(200) {
            now += dt;
            for event in machine.tick(at(t0, now)) {
                if let TimerEvent::StopFired(stop) = event {
                    fired.push(stop.fire_offset);
                }
            }
            assert!(machine.elapsed() + 1e-9 >= last_elapsed);
            last_elapsed = machine.elapsed();
        }

        assert_eq!(fired, offsets.to_vec());
        assert_eq!(machine.flash_seq(), offsets.len() as u64);
    }

    #[test]
    fn elapsed_is_constant_while_stop_is_active() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.add_stop_event(secs(1.0), secs(3.0));
        machine.tick(at(t0, 1.0));

        let mut now = 1.0;
        let mut last_hold = machine.stop_remaining();
        while machine.stop_active() {
            now += 0.13;
            machine.tick(at(t0, now));
            if machine.stop_active() {
                assert!(approx(machine.elapsed(), 1.0));
                assert!(machine.stop_remaining() <= last_hold);
                last_hold = machine.stop_remaining();
            }
        }
        assert!(now > 3.9);
    }

    // ===========================================
    // Counters and snapshots
    // ===========================================

    #[test]
    fn state_seq_counts_broadcasts() {
        let t0 = Instant::now();
        let mut machine = running(t0);
        machine.tick(at(t0, 0.1));
        let first = machine.publish();
        machine.tick(at(t0, 0.2));
        let second = machine.publish();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        let peek = machine.snapshot();
        assert_eq!(peek.sequence, 2);
    }

    #[test]
    fn action_seq_counts_applied_actions_only() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        machine.start(secs(3.0), t0);
        machine.reset();
        machine.pause(t0);
        machine.resume(at(t0, 1.0));
        assert_eq!(machine.action_seq(), 3);
    }

    #[test]
    fn snapshot_carries_configuration() {
        let flash = FlashConfig {
            style: FlashStyle::Blink,
            duration_ms: 900,
            color: Rgb::new(10, 20, 30),
        };
        let machine = TimerMachine::default()
            .with_flash(flash)
            .with_show_hours(true);
        let envelope = machine.snapshot();
        assert_eq!(envelope.session, Some(machine.session()));
        assert_eq!(envelope.flash_style, FlashStyle::Blink);
        assert_eq!(envelope.flash_duration_ms, 900);
        assert_eq!(envelope.flash_color, Rgb::new(10, 20, 30));
        assert!(envelope.show_hours);
        assert_eq!(envelope.role, Role::Parent);
        assert_eq!(envelope.flash_seq, Some(0));
    }

    #[test]
    fn apply_dispatches_actions() {
        let t0 = Instant::now();
        let mut machine = TimerMachine::default();
        assert!(machine
            .apply(&UserAction::Start(secs(2.0)), t0)
            .is_applied());
        assert!(machine.apply(&UserAction::Flash, t0).is_applied());
        assert!(machine.apply(&UserAction::Pause, t0).is_applied());
        assert_eq!(machine.apply(&UserAction::Pause, t0), ActionOutcome::Rejected);
        assert_eq!(machine.flash_seq(), 1);
    }
}
