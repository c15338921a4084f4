//! Follow command - dial a parent and show its timer.

use anyhow::{Context, Result};
use cue_client::{ChildSession, ClientError, FollowerConfig, TcpTransport};
use cue_core::{parse_action, DialTarget, PowerState, Prediction, UserAction};
use cue_types::{Phase, Request};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// Run the follow command until Ctrl-C.
///
/// The status line is redrawn at whatever rate the session's cadence asks
/// for; `low_power` pins it to the low-power rate.
pub async fn run(address: &str, connect_timeout: Duration, low_power: bool) -> Result<()> {
    let target: DialTarget = address
        .parse()
        .with_context(|| format!("Invalid parent address '{}'", address))?;

    let mut config = FollowerConfig::new(target);
    config.connect_timeout = connect_timeout;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (session, handle) = ChildSession::new(Arc::new(TcpTransport::new()), config, shutdown_rx);
    if low_power {
        handle.set_power(PowerState::Constrained);
    }
    let mut task = tokio::spawn(session.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut next_redraw = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_redraw) => {
                if let Some(prediction) = handle.prediction() {
                    print!("\r{:<40}", render_line(&prediction, Instant::now()));
                    let _ = std::io::stdout().flush();
                }
                next_redraw = tokio::time::Instant::now() + handle.refresh_interval();
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let Some(request) = request_for_line(&line) else {
                        continue;
                    };
                    match request {
                        Ok(request) => match handle.send(request).await {
                            Ok(()) => {}
                            Err(ClientError::Stale) => println!("\nnot sent: parent view is stale"),
                            Err(e) => println!("\nnot sent: {}", e),
                        },
                        Err(message) => println!("\n{}", message),
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Reading stdin failed: {}", e);
                    stdin_open = false;
                }
            },
            result = &mut task => {
                println!();
                return result.context("Child task panicked")?.map_err(Into::into);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!();
    shutdown_tx.send_replace(true);
    task.await.context("Child task panicked")??;
    Ok(())
}

/// Turn an operator line into a request for the parent.
///
/// `None` for blank lines; `Err` carries a message for the operator.
pub fn request_for_line(line: &str) -> Option<std::result::Result<Request, String>> {
    if line.trim().is_empty() {
        return None;
    }
    let action = match parse_action(line) {
        Ok(action) => action,
        Err(e) => return Some(Err(format!("error: {}", e))),
    };
    Some(to_request(&action).ok_or_else(|| "only the parent can schedule events".to_string()))
}

/// Request a child may forward for `action`, if any.
pub fn to_request(action: &UserAction) -> Option<Request> {
    match action {
        UserAction::Start(duration) => Some(Request::Start {
            duration: duration.get(),
        }),
        UserAction::Pause => Some(Request::Pause),
        UserAction::Resume => Some(Request::Resume),
        UserAction::Reset => Some(Request::Reset),
        UserAction::Flash => Some(Request::Flash),
        UserAction::AddStop { .. } | UserAction::AddCue { .. } | UserAction::AddRestart(_) => {
            None
        }
    }
}

/// One status line: phase, clock, hold, flash, staleness.
pub fn render_line(prediction: &Prediction, at: Instant) -> String {
    let mut line = format!(
        "{:<9} {}",
        phase_label(prediction.phase()),
        format_clock(prediction.current_main_value(at), prediction.show_hours())
    );
    if prediction.stop_active() {
        line.push_str(&format!(
            "  HOLD {}",
            format_clock(prediction.current_stop_value(at), false)
        ));
    }
    if prediction.active_flash(at).is_some_and(|flash| flash.lit) {
        line.push_str("  *");
    }
    if prediction.is_stale() {
        line.push_str("  (stale)");
    }
    line
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "idle",
        Phase::Countdown => "countdown",
        Phase::Running => "running",
        Phase::Paused => "paused",
        Phase::Unknown => "?",
    }
}

/// `m:ss.t`, or `h:mm:ss.t` when asked for or needed.
pub fn format_clock(seconds: f64, show_hours: bool) -> String {
    let tenths = (seconds.max(0.0) * 10.0).floor() as u64;
    let (total_secs, tenth) = (tenths / 10, tenths % 10);
    let (hours, minutes, secs) = (total_secs / 3600, (total_secs / 60) % 60, total_secs % 60);

    if show_hours || hours > 0 {
        format!("{}:{:02}:{:02}.{}", hours, minutes, secs, tenth)
    } else {
        format!("{}:{:02}.{}", minutes, secs, tenth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cue_core::Reconciler;
    use cue_types::Envelope;

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0.0, false), "0:00.0");
        assert_eq!(format_clock(65.43, false), "1:05.4");
        assert_eq!(format_clock(3725.0, false), "1:02:05.0");
        assert_eq!(format_clock(5.0, true), "0:00:05.0");
        assert_eq!(format_clock(-2.0, false), "0:00.0");
    }

    #[test]
    fn only_timer_commands_are_forwarded() {
        assert_eq!(
            request_for_line("start 30"),
            Some(Ok(Request::Start { duration: 30.0 }))
        );
        assert_eq!(request_for_line("flash"), Some(Ok(Request::Flash)));
        assert!(matches!(request_for_line("stop 5 2"), Some(Err(_))));
        assert!(matches!(request_for_line("start soon"), Some(Err(_))));
        assert_eq!(request_for_line("  "), None);
    }

    #[test]
    fn render_line_shows_hold_and_staleness() {
        let mut reconciler = Reconciler::default();
        let now = Instant::now();
        reconciler.ingest(
            &Envelope {
                phase: Phase::Running,
                remaining: 12.0,
                stop_active: true,
                stop_remaining: 3.0,
                ..Envelope::default()
            },
            now,
        );

        let prediction = reconciler.prediction().unwrap();
        let line = render_line(&prediction, now);
        assert!(line.starts_with("running   0:12.0"), "{}", line);
        assert!(line.contains("HOLD 0:03.0"), "{}", line);
        assert!(!line.contains("stale"), "{}", line);

        reconciler.poll(now + Duration::from_secs(10));
        let line = render_line(&reconciler.prediction().unwrap(), now);
        assert!(line.ends_with("(stale)"), "{}", line);
    }
}
