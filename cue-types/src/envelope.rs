//! Envelope - the full timer snapshot sent from the parent to every receiver.

use serde::{Deserialize, Serialize};

use crate::{SessionId, WireError};

/// Protocol version written into every envelope.
pub const PROTOCOL_VERSION: u8 = 1;

/// Flash window length used when the sender omits `flash_duration_ms`.
pub const DEFAULT_FLASH_DURATION_MS: u32 = 500;

/// Coarse state of the parent's timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not started, or reset.
    #[default]
    Idle,
    /// Counting down toward the start of the run.
    Countdown,
    /// Counting up.
    Running,
    /// Frozen; resumes into Countdown or Running.
    Paused,
    /// A phase this build doesn't know about.
    #[serde(other)]
    Unknown,
}

impl Phase {
    /// Whether the main value moves while in this phase.
    pub fn is_counting(self) -> bool {
        matches!(self, Phase::Countdown | Phase::Running)
    }

    /// Timer-seconds per wall-second implied by the phase alone.
    pub fn implied_velocity(self) -> f64 {
        match self {
            Phase::Countdown => -1.0,
            Phase::Running => 1.0,
            Phase::Idle | Phase::Paused | Phase::Unknown => 0.0,
        }
    }
}

/// How a receiver renders a flash edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashStyle {
    /// Lit for the whole window.
    #[default]
    Solid,
    /// Toggles on and off during the window.
    Blink,
    /// Haptic pulse only, no visual.
    Haptic,
    /// Flashing disabled.
    Off,
    /// A style this build doesn't know about.
    #[serde(other)]
    Unknown,
}

/// Role of the device that produced a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The authoritative timer owner.
    #[default]
    Parent,
    /// An observer following the parent.
    Child,
    /// A role this build doesn't know about.
    #[serde(other)]
    Unknown,
}

/// Which channel carried a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Phone-to-phone reliable stream.
    #[default]
    Stream,
    /// Phone-to-companion sticky channel.
    Companion,
    /// A link this build doesn't know about.
    #[serde(other)]
    Unknown,
}

/// An sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Plain white, the default flash color.
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    /// Create a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

/// A scheduled pause-with-hold, consumed once `elapsed` reaches `fire_offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopEvent {
    /// Elapsed seconds at which the stop fires.
    pub fire_offset: f64,
    /// Seconds the timer holds before resuming.
    pub hold_duration: f64,
}

impl StopEvent {
    /// Create a stop event.
    pub fn new(fire_offset: f64, hold_duration: f64) -> Self {
        Self {
            fire_offset,
            hold_duration,
        }
    }
}

/// A display-only cue marker. Never consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueEvent {
    /// Elapsed seconds the marker sits at.
    pub fire_offset: f64,
    /// Identifier of an attached asset, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
}

impl CueEvent {
    /// Create a cue marker without an asset.
    pub fn new(fire_offset: f64) -> Self {
        Self {
            fire_offset,
            asset_id: None,
        }
    }
}

/// A display-only restart marker. Never consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartEvent {
    /// Elapsed seconds the marker sits at.
    pub fire_offset: f64,
}

impl RestartEvent {
    /// Create a restart marker.
    pub fn new(fire_offset: f64) -> Self {
        Self { fire_offset }
    }
}

/// One complete, self-describing snapshot of timer state.
///
/// Not a diff: a receiver can resynchronize from any single envelope.
/// Every field has a default so that envelopes from older senders decode,
/// and unknown fields from newer senders are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Parent session that produced this snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    /// Broadcast counter (`state_seq`), non-decreasing within a session.
    pub sequence: u64,
    /// User-action counter. Drives the legacy flash fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_seq: Option<u64>,
    /// Current phase.
    pub phase: Phase,
    /// Main displayed value: countdown remaining, or elapsed.
    pub remaining: f64,
    /// Pending stop events, ascending by offset.
    pub stop_events: Vec<StopEvent>,
    /// Cue markers, ascending by offset.
    pub cue_events: Vec<CueEvent>,
    /// Restart markers, ascending by offset.
    pub restart_events: Vec<RestartEvent>,
    /// Whether a stop hold is in progress.
    pub stop_active: bool,
    /// Seconds left in the current stop hold.
    pub stop_remaining: f64,
    /// Monotonic flash edge counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_seq: Option<u64>,
    /// Legacy boolean flash flag, only read when `flash_seq` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<bool>,
    /// How receivers render a flash.
    pub flash_style: FlashStyle,
    /// Flash window length in milliseconds.
    pub flash_duration_ms: u32,
    /// Flash color.
    pub flash_color: Rgb,
    /// Display hint: format with an hours field.
    pub show_hours: bool,
    /// Role of the sender.
    pub role: Role,
    /// Channel this envelope was prepared for.
    pub link: LinkKind,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            session: None,
            sequence: 0,
            action_seq: None,
            phase: Phase::Idle,
            remaining: 0.0,
            stop_events: Vec::new(),
            cue_events: Vec::new(),
            restart_events: Vec::new(),
            stop_active: false,
            stop_remaining: 0.0,
            flash_seq: None,
            flash: None,
            flash_style: FlashStyle::Solid,
            flash_duration_ms: DEFAULT_FLASH_DURATION_MS,
            flash_color: Rgb::WHITE,
            show_hours: false,
            role: Role::Parent,
            link: LinkKind::Stream,
        }
    }
}

impl Envelope {
    /// Whether the main value is moving: a counting phase with no stop hold.
    pub fn is_counting(&self) -> bool {
        self.phase.is_counting() && !self.stop_active
    }

    /// Copy of this envelope retargeted at another channel.
    pub fn for_link(&self, link: LinkKind) -> Self {
        Self {
            link,
            ..self.clone()
        }
    }

    /// Serialize to a compact JSON document (stream channel).
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Json)
    }

    /// Deserialize from a JSON document (stream channel).
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Json)
    }

    /// Serialize to named-field MessagePack (companion channel).
    pub fn to_companion_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack (companion channel).
    pub fn from_companion_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_envelope() -> Envelope {
        Envelope {
            version: 1,
            session: Some(SessionId::new()),
            sequence: 42,
            action_seq: Some(7),
            phase: Phase::Running,
            remaining: 12.5,
            stop_events: vec![StopEvent::new(20.0, 3.0), StopEvent::new(45.5, 1.25)],
            cue_events: vec![
                CueEvent::new(5.0),
                CueEvent {
                    fire_offset: 9.75,
                    asset_id: Some("slide-3".into()),
                },
            ],
            restart_events: vec![RestartEvent::new(60.0)],
            stop_active: true,
            stop_remaining: 0.5,
            flash_seq: Some(3),
            flash: None,
            flash_style: FlashStyle::Blink,
            flash_duration_ms: 750,
            flash_color: Rgb::new(255, 64, 0),
            show_hours: true,
            role: Role::Parent,
            link: LinkKind::Stream,
        }
    }

    #[test]
    fn json_roundtrip_preserves_every_field() {
        let envelope = busy_envelope();
        let bytes = envelope.to_json().unwrap();
        let restored = Envelope::from_json(&bytes).unwrap();
        assert_eq!(envelope, restored);
    }

    #[test]
    fn companion_roundtrip_preserves_every_field() {
        let envelope = busy_envelope().for_link(LinkKind::Companion);
        let bytes = envelope.to_companion_bytes().unwrap();
        let restored = Envelope::from_companion_bytes(&bytes).unwrap();
        assert_eq!(envelope, restored);
    }

    #[test]
    fn empty_document_decodes_to_defaults() {
        let restored = Envelope::from_json(b"{}").unwrap();
        assert_eq!(restored, Envelope::default());
        assert_eq!(restored.flash_duration_ms, DEFAULT_FLASH_DURATION_MS);
        assert_eq!(restored.flash_color, Rgb::WHITE);
        assert!(restored.flash_seq.is_none());
    }

    #[test]
    fn absent_optionals_are_not_written() {
        let bytes = Envelope::default().to_json().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("flash_seq"));
        assert!(!text.contains("session"));
        assert!(!text.contains("action_seq"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = br#"{"sequence":9,"phase":"running","remaining":3.0,"tempo_bpm":120}"#;
        let restored = Envelope::from_json(json).unwrap();
        assert_eq!(restored.sequence, 9);
        assert_eq!(restored.phase, Phase::Running);
        assert_eq!(restored.remaining, 3.0);
    }

    #[test]
    fn unknown_enum_values_map_to_unknown() {
        let json = br#"{"phase":"rehearsal","flash_style":"strobe","role":"observer","link":"bluetooth"}"#;
        let restored = Envelope::from_json(json).unwrap();
        assert_eq!(restored.phase, Phase::Unknown);
        assert_eq!(restored.flash_style, FlashStyle::Unknown);
        assert_eq!(restored.role, Role::Unknown);
        assert_eq!(restored.link, LinkKind::Unknown);
    }

    #[test]
    fn partial_stop_event_uses_defaults() {
        let json = br#"{"stop_events":[{"fire_offset":4.0}]}"#;
        let restored = Envelope::from_json(json).unwrap();
        assert_eq!(restored.stop_events, vec![StopEvent::new(4.0, 0.0)]);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Envelope::from_json(b"{\"sequence\":").is_err());
        assert!(Envelope::from_json(br#"{"sequence":"nine"}"#).is_err());
    }

    #[test]
    fn compact_json_has_no_raw_newline() {
        let mut envelope = busy_envelope();
        envelope.cue_events[1].asset_id = Some("line one\nline two".into());
        let bytes = envelope.to_json().unwrap();
        assert!(!bytes.contains(&b'\n'));
    }

    #[test]
    fn counting_excludes_stop_hold() {
        let mut envelope = Envelope {
            phase: Phase::Running,
            ..Envelope::default()
        };
        assert!(envelope.is_counting());
        envelope.stop_active = true;
        assert!(!envelope.is_counting());
        envelope.stop_active = false;
        envelope.phase = Phase::Paused;
        assert!(!envelope.is_counting());
    }

    #[test]
    fn implied_velocity_by_phase() {
        assert_eq!(Phase::Countdown.implied_velocity(), -1.0);
        assert_eq!(Phase::Running.implied_velocity(), 1.0);
        assert_eq!(Phase::Paused.implied_velocity(), 0.0);
        assert_eq!(Phase::Unknown.implied_velocity(), 0.0);
    }
}
