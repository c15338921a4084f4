//! Connection lifecycle state machine.
//!
//! This module provides a pure, side-effect-free state machine for a link
//! between a parent and a child. It takes events as input and produces a
//! new state plus a list of actions to execute.
//!
//! The actual I/O (listening, dialing, sleeping between retries) is done by
//! cuesync-client and cuesync-host, not by this module.

use std::time::Duration;

/// Link state - NO I/O, just state transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Parent: accepting children.
    Listening,
    /// Child: dialing, or waiting to redial.
    Connecting {
        /// Dial attempt in progress (starts at 1).
        attempt: u32,
    },
    /// Child: connected to the parent.
    Established,
    /// Gave up.
    Failed {
        /// Why.
        reason: String,
    },
    /// Shut down on request.
    Closed,
}

impl LinkState {
    /// Create a state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. The caller executes the returned actions.
    pub fn on_event(self, event: LinkEvent) -> (Self, Vec<LinkAction>) {
        match (self, event) {
            // Closed is terminal
            (Self::Closed, _) => (Self::Closed, vec![]),

            (_, LinkEvent::Close) => (
                Self::Closed,
                vec![
                    LinkAction::CancelRetry,
                    LinkAction::CloseTransport,
                    LinkAction::Report(LinkReport::Closed),
                ],
            ),

            // From Idle
            (Self::Idle, LinkEvent::Listen) => (
                Self::Listening,
                vec![
                    LinkAction::Listen,
                    LinkAction::Report(LinkReport::Listening),
                ],
            ),
            (Self::Idle | Self::Failed { .. }, LinkEvent::Dial) => {
                (Self::Connecting { attempt: 1 }, vec![LinkAction::Dial])
            }

            // From Connecting
            (Self::Connecting { attempt }, LinkEvent::Connected) => (
                Self::Established,
                vec![LinkAction::Report(LinkReport::Established { attempt })],
            ),
            (Self::Connecting { attempt }, LinkEvent::ConnectFailed { error }) => (
                Self::Connecting {
                    attempt: attempt.saturating_add(1),
                },
                vec![
                    LinkAction::Report(LinkReport::DialFailed { attempt, error }),
                    LinkAction::ScheduleRetry {
                        delay: calculate_backoff(attempt),
                    },
                ],
            ),
            (Self::Connecting { attempt }, LinkEvent::RetryTimer) => {
                (Self::Connecting { attempt }, vec![LinkAction::Dial])
            }
            (Self::Connecting { .. }, LinkEvent::TimedOut) => {
                let reason = String::from("connect timed out");
                (
                    Self::Failed {
                        reason: reason.clone(),
                    },
                    vec![
                        LinkAction::CancelRetry,
                        LinkAction::Report(LinkReport::GaveUp { reason }),
                    ],
                )
            }

            // From Established
            (Self::Established, LinkEvent::Disconnected { reason }) => (
                Self::Connecting { attempt: 1 },
                vec![
                    LinkAction::Report(LinkReport::Lost { reason }),
                    LinkAction::ScheduleRetry {
                        delay: calculate_backoff(1),
                    },
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the child link is up.
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established)
    }

    /// Check if the link is finished (failed or closed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Closed)
    }
}

/// Events that can occur in the link lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Parent: start accepting children.
    Listen,
    /// Child: start dialing.
    Dial,
    /// Dial succeeded.
    Connected,
    /// Dial failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Retry delay elapsed.
    RetryTimer,
    /// An established link dropped.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// The overall connect deadline passed.
    TimedOut,
    /// Shut down.
    Close,
}

/// Actions to be executed by the I/O layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Bind and accept.
    Listen,
    /// Dial the parent.
    Dial,
    /// Sleep, then deliver [`LinkEvent::RetryTimer`].
    ScheduleRetry {
        /// Delay before the next dial.
        delay: Duration,
    },
    /// Drop any pending retry.
    CancelRetry,
    /// Close the transport.
    CloseTransport,
    /// Tell the application.
    Report(LinkReport),
}

/// Lifecycle notifications for the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkReport {
    /// Parent is accepting children.
    Listening,
    /// Child connected.
    Established {
        /// Which dial attempt succeeded.
        attempt: u32,
    },
    /// A dial attempt failed; another will follow.
    DialFailed {
        /// Which attempt failed.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
    /// An established link dropped.
    Lost {
        /// Reason for disconnection.
        reason: String,
    },
    /// Gave up connecting.
    GaveUp {
        /// Why.
        reason: String,
    },
    /// Closed on request.
    Closed,
}

/// How many children a listening parent has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentStatus {
    /// Listening, nobody connected.
    NoChildren,
    /// Listening with this many children.
    Children(usize),
}

impl ParentStatus {
    /// Status for a child count.
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => Self::NoChildren,
            n => Self::Children(n),
        }
    }

    /// Number of connected children.
    pub fn count(self) -> usize {
        match self {
            Self::NoChildren => 0,
            Self::Children(n) => n,
        }
    }
}

/// Calculate redial backoff with jitter.
///
/// Formula: min(5s, 250ms * 2^(attempt-1)) + random(0..250ms)
pub fn calculate_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    let base = Duration::from_millis(250 * 2u64.pow(exponent)).min(Duration::from_secs(5));
    base + Duration::from_millis(random_jitter_ms())
}

/// Random jitter between 0 and 250 milliseconds.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    // Without entropy the retry is simply not jittered.
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % 251
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        assert_eq!(LinkState::new(), LinkState::Idle);
    }

    #[test]
    fn listen_transitions_to_listening() {
        let (state, actions) = LinkState::Idle.on_event(LinkEvent::Listen);
        assert_eq!(state, LinkState::Listening);
        assert!(actions.contains(&LinkAction::Listen));
    }

    #[test]
    fn dial_transitions_to_connecting() {
        let (state, actions) = LinkState::Idle.on_event(LinkEvent::Dial);
        assert_eq!(state, LinkState::Connecting { attempt: 1 });
        assert_eq!(actions, vec![LinkAction::Dial]);
    }

    #[test]
    fn connect_success_establishes() {
        let (state, actions) =
            LinkState::Connecting { attempt: 3 }.on_event(LinkEvent::Connected);
        assert!(state.is_established());
        assert!(actions.contains(&LinkAction::Report(LinkReport::Established { attempt: 3 })));
    }

    #[test]
    fn connect_failure_schedules_retry() {
        let (state, actions) = LinkState::Connecting { attempt: 1 }.on_event(
            LinkEvent::ConnectFailed {
                error: "refused".into(),
            },
        );
        assert_eq!(state, LinkState::Connecting { attempt: 2 });
        assert!(actions
            .iter()
            .any(|a| matches!(a, LinkAction::ScheduleRetry { .. })));
    }

    #[test]
    fn retry_timer_redials_without_resetting_attempt() {
        let (state, actions) =
            LinkState::Connecting { attempt: 4 }.on_event(LinkEvent::RetryTimer);
        assert_eq!(state, LinkState::Connecting { attempt: 4 });
        assert_eq!(actions, vec![LinkAction::Dial]);
    }

    #[test]
    fn timeout_fails_the_dial() {
        let (state, actions) = LinkState::Connecting { attempt: 7 }.on_event(LinkEvent::TimedOut);
        assert!(matches!(state, LinkState::Failed { .. }));
        assert!(state.is_terminal());
        assert!(actions.contains(&LinkAction::CancelRetry));
    }

    #[test]
    fn failed_link_can_dial_again() {
        let failed = LinkState::Failed {
            reason: "connect timed out".into(),
        };
        let (state, _) = failed.on_event(LinkEvent::Dial);
        assert_eq!(state, LinkState::Connecting { attempt: 1 });
    }

    #[test]
    fn lost_link_starts_reconnecting() {
        let (state, actions) = LinkState::Established.on_event(LinkEvent::Disconnected {
            reason: "reset by peer".into(),
        });
        assert_eq!(state, LinkState::Connecting { attempt: 1 });
        assert!(actions
            .iter()
            .any(|a| matches!(a, LinkAction::ScheduleRetry { .. })));
    }

    #[test]
    fn close_is_terminal() {
        let (state, actions) = LinkState::Listening.on_event(LinkEvent::Close);
        assert_eq!(state, LinkState::Closed);
        assert!(actions.contains(&LinkAction::Report(LinkReport::Closed)));

        let (state, actions) = state.on_event(LinkEvent::Dial);
        assert_eq!(state, LinkState::Closed);
        assert!(actions.is_empty());
    }

    #[test]
    fn invalid_transition_keeps_state() {
        let (state, actions) = LinkState::Listening.on_event(LinkEvent::Connected);
        assert_eq!(state, LinkState::Listening);
        assert!(actions.is_empty());
    }

    #[test]
    fn parent_status_counts_children() {
        assert_eq!(ParentStatus::from_count(0), ParentStatus::NoChildren);
        assert_eq!(ParentStatus::from_count(3), ParentStatus::Children(3));
        assert_eq!(ParentStatus::Children(3).count(), 3);
        assert_eq!(ParentStatus::NoChildren.count(), 0);
    }

    #[test]
    fn backoff_increases_with_attempt() {
        assert!(calculate_backoff(1) >= Duration::from_millis(250));
        assert!(calculate_backoff(3) >= Duration::from_secs(1));
        assert!(calculate_backoff(50) <= Duration::from_millis(5_250));
    }
}
