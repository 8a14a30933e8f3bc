//! Restart coordination for failed watchers.
//!
//! Given a watcher whose rules failed, decide whether to restart its apps
//! now, hold off because an app is inside its restart delay, or do
//! nothing. Every outcome is reported on the event bus; none of them is
//! returned as an error.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::ManagerResult;
use crate::event::{Event, EventBus};
use crate::manager::ProcessManager;
use crate::watcher::{Action, Watcher};

/// Applies a failed watcher's action through the process manager.
pub struct RestartCoordinator {
    manager: Arc<dyn ProcessManager>,
    /// Serials of watchers with a restart sequence running.
    in_flight: Mutex<HashSet<u64>>,
}

/// Releases a watcher's in-flight slot on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<u64>>,
    serial: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.serial);
    }
}

impl RestartCoordinator {
    pub fn new(manager: Arc<dyn ProcessManager>) -> Self {
        Self {
            manager,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run the watcher's action. Resolves once the action is finished.
    pub async fn handle(&self, watcher: &Watcher, bus: &EventBus) {
        match watcher.action() {
            Action::None => {
                debug!(watcher = %watcher.id(), "action is none, not restarting");
            }
            Action::Restart => {
                let Some(_slot) = self.claim(watcher.serial) else {
                    debug!(watcher = %watcher.id(), "restart already in flight, skipping");
                    return;
                };
                self.restart(watcher, bus).await;
            }
        }
    }

    /// Whether a restart sequence is currently running for `watcher`.
    pub fn is_in_flight(&self, watcher: &Watcher) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&watcher.serial)
    }

    fn claim(&self, serial: u64) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.insert(serial).then_some(InFlight {
            set: &self.in_flight,
            serial,
        })
    }

    async fn restart(&self, watcher: &Watcher, bus: &EventBus) {
        let id = watcher.id();
        let apps = watcher.apps().join(", ");

        if let Err(e) = self.manager.connect().await {
            warn!(watcher = %id, error = %e, "process manager connect failed");
            bus.publish(Event::Error {
                message: format!("Error connecting to process manager for app \"{apps}\" - {e}"),
            });
            return;
        }

        if let Some(delay) = watcher.restart_delay() {
            match self.apps_within_delay(watcher, delay).await {
                Ok(0) => {}
                Ok(young) => {
                    info!(
                        watcher = %id,
                        young,
                        delay_ms = delay.as_millis() as u64,
                        "restart delayed"
                    );
                    bus.publish(Event::RestartDelay {
                        message: format!(
                            "Delaying restart of app \"{apps}\" - {young} app(s) up for less than {}ms",
                            delay.as_millis()
                        ),
                    });
                    return;
                }
                Err(e) => {
                    warn!(watcher = %id, error = %e, "uptime query failed");
                    bus.publish(Event::Error {
                        message: format!("Error querying uptime of app \"{apps}\" - {e}"),
                    });
                    return;
                }
            }
        }

        info!(watcher = %id, %apps, "restarting");
        bus.publish(Event::Restart { id: id.to_string() });

        let results = join_all(watcher.apps().iter().map(|app| self.manager.restart(app))).await;
        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        bus.publish(Event::PostRestart { id: id.to_string() });

        if !errors.is_empty() {
            warn!(watcher = %id, failed = errors.len(), "restart failed");
            bus.publish(Event::Error {
                message: format!("Error rebooting app \"{apps}\" - {}", errors.join("; ")),
            });
        }
    }

    /// Count apps that have been up for less than `delay`.
    async fn apps_within_delay(&self, watcher: &Watcher, delay: Duration) -> ManagerResult<usize> {
        let infos = join_all(watcher.apps().iter().map(|app| self.manager.describe(app))).await;
        let mut young = 0;
        for info in infos {
            if info?.uptime < delay {
                young += 1;
            }
        }
        Ok(young)
    }
}
