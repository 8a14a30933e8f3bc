//! The process manager collaborator.
//!
//! pmwatch never spawns or kills processes itself; it asks a process
//! manager (pm2 in production, see [`crate::pm2`]) to do so.

use std::time::Duration;

use crate::BoxFuture;
use crate::error::ManagerResult;

/// Runtime facts about one managed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    /// How long the app has been running since its last (re)start.
    pub uptime: Duration,
}

pub trait ProcessManager: Send + Sync {
    /// Make sure the manager is reachable. Called before every restart
    /// sequence, so it must be cheap to repeat.
    fn connect(&self) -> BoxFuture<'_, ManagerResult<()>>;

    fn restart<'a>(&'a self, app: &'a str) -> BoxFuture<'a, ManagerResult<()>>;

    fn describe<'a>(&'a self, app: &'a str) -> BoxFuture<'a, ManagerResult<ProcessInfo>>;
}
