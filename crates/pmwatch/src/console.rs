//! Console output for supervisor events.
//!
//! | verbosity | printed                          |
//! |-----------|----------------------------------|
//! | 0         | error                            |
//! | 1         | + add, restart, restartDelay     |
//! | 2         | + check                          |
//! | 3         | + preCycle, postRestart          |

use pmwatch_core::Event;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Format `event` for the console, or `None` if it is too chatty for
/// `verbosity`.
pub fn render(event: &Event, verbosity: u8) -> Option<String> {
    let (level, line) = match event {
        Event::Error { message } => (0, format!("ERROR {message}")),
        Event::Add(watcher) => (
            1,
            format!(
                "Monitor apps [{}] with {} rule(s)",
                watcher.apps().join(","),
                watcher.ruleset().len()
            ),
        ),
        Event::Restart { id } => (1, format!("RESTART {id}")),
        Event::RestartDelay { message } => (1, format!("DELAY {message}")),
        Event::Check { id, healthy, error } => {
            let mut line = format!("ID {id} has state {healthy}");
            if let Some(reason) = error {
                line.push_str(&format!(" ({reason})"));
            }
            (2, line)
        }
        Event::PreCycle => (3, "CYCLE".to_string()),
        Event::PostRestart { id } => (3, format!("RESTARTED {id}")),
    };
    (verbosity >= level).then_some(line)
}

/// Print events until the bus is reset or dropped.
pub async fn print_events(mut rx: broadcast::Receiver<Event>, verbosity: u8) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = render(&event, verbosity) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "console fell behind, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
