//! Host command - run the parent timer and drive it from stdin.

use anyhow::{Context, Result};
use cue_core::{parse_action, ActionOutcome, ParentStatus};
use cue_host::{Config, Host, HostHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use super::pair::pairing_target;

const HELP: &str = "\
commands:
  start <seconds>        countdown, then count up (0 counts up at once)
  pause | resume | reset | flash
  stop <offset> <hold>   hold at an elapsed offset
  cue <offset> [asset]   add a cue marker
  restart <offset>       add a restart marker
  status                 connected children and counters
  help";

/// Run the host command until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let port = config.server.port;
    let (host, handle) = Host::bind(config, None)
        .await
        .context("Failed to start parent")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(host.run(shutdown_rx));

    let port = if port == 0 { handle.local_addr().port() } else { port };
    println!("Parent listening on {}", handle.local_addr());
    println!("Children join with: cuesync follow {}", pairing_target(port));
    println!("Type 'help' for commands, Ctrl-C to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = execute_line(&handle, &line).await? {
                        println!("{}", reply);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Reading stdin failed: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    shutdown_tx.send_replace(true);
    task.await.context("Parent task panicked")??;
    Ok(())
}

/// Execute one operator line. Returns the text to show, if any.
///
/// Bad input is reported, not returned as an error; only a stopped parent
/// is fatal.
pub async fn execute_line(handle: &HostHandle, line: &str) -> Result<Option<String>> {
    let line = line.trim();
    match line {
        "" => return Ok(None),
        "help" | "?" => return Ok(Some(HELP.to_string())),
        "status" => return Ok(Some(status_line(handle))),
        _ => {}
    }

    let action = match parse_action(line) {
        Ok(action) => action,
        Err(e) => return Ok(Some(format!("error: {}", e))),
    };

    let outcome = handle.apply(action).await?;
    let phase = handle.snapshot().await?.phase;
    Ok(Some(match outcome {
        ActionOutcome::Applied => format!("ok ({:?})", phase),
        ActionOutcome::Rejected => format!("rejected in {:?}", phase),
    }))
}

fn status_line(handle: &HostHandle) -> String {
    let metrics = handle.metrics();
    let children = match handle.status() {
        ParentStatus::NoChildren => "no children".to_string(),
        ParentStatus::Children(1) => "1 child".to_string(),
        ParentStatus::Children(n) => format!("{} children", n),
    };
    format!(
        "{}, {} broadcasts, {} frames sent, {} send failures",
        children, metrics.broadcasts_total, metrics.frames_sent, metrics.send_failures
    )
}
