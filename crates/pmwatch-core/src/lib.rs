//! pmwatch-core: health-check supervision for process-manager apps.
//!
//! Watches named groups of apps, evaluates their health rules on a fixed
//! interval, and asks an external process manager to restart the apps
//! whose rules fail.
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//!   ├── WatchRegistry (add / clear, id assignment)
//!   ├── EventBus (add, preCycle, check, restart, restartDelay, postRestart, error)
//!   ├── cycle() → one concurrent pass over a registry snapshot
//!   │   ├── Rule::evaluate() per watcher rule (HTTP probe, custom)
//!   │   │   └── Validator (substring, pattern, predicate)
//!   │   └── RestartCoordinator on failure
//!   │       └── ProcessManager (connect, describe, restart)
//!   └── monitor() → self re-arming periodic loop
//! ```
//!
//! # Restart debounce
//!
//! A watcher with a `restart_delay` is not restarted while any of its
//! apps has been up for less than that delay. Restarts of the same
//! watcher never overlap.

pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod pm2;
pub mod restart;
pub mod rule;
pub mod supervisor;
pub mod transport;
pub mod validator;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::PmwatchConfig;
pub use error::{ConfigError, ManagerError, RuleError, TransportError, WatchError};
pub use event::{Event, EventBus};
pub use manager::{ProcessInfo, ProcessManager};
pub use pm2::Pm2;
pub use restart::RestartCoordinator;
pub use rule::{HttpRule, Rule, RuleSet};
pub use supervisor::{CycleSummary, DriverState, Supervisor};
pub use transport::{HttpClient, HyperClient, ProbeResponse};
pub use validator::Validator;
pub use watcher::{Action, Apps, WatchOptions, WatchRegistry, Watcher};

/// Boxed future used at the collaborator seams.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
