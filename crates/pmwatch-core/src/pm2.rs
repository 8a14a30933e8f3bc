//! pm2 adapter.
//!
//! Drives the `pm2` CLI: `pm2 ping` to connect (this also boots the pm2
//! daemon if needed), `pm2 restart <app>`, and `pm2 jlist` to read
//! process uptimes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::BoxFuture;
use crate::error::{ManagerError, ManagerResult};
use crate::manager::{ProcessInfo, ProcessManager};

/// [`ProcessManager`] backed by the pm2 command line.
#[derive(Debug, Clone)]
pub struct Pm2 {
    program: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: String,
    #[serde(default)]
    pm2_env: Pm2Env,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Env {
    /// Epoch millis of the last (re)start.
    pm_uptime: Option<u64>,
}

impl Pm2 {
    pub fn new() -> Self {
        Self::with_program("pm2")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> ManagerResult<String> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        debug!(%command, "running pm2");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ManagerError::Unavailable(format!("{command}: {e}")))?;

        if !output.status.success() {
            return Err(ManagerError::Command {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for Pm2 {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager for Pm2 {
    fn connect(&self) -> BoxFuture<'_, ManagerResult<()>> {
        Box::pin(async move {
            self.run(&["ping"]).await?;
            Ok(())
        })
    }

    fn restart<'a>(&'a self, app: &'a str) -> BoxFuture<'a, ManagerResult<()>> {
        Box::pin(async move {
            self.run(&["restart", app]).await?;
            info!(%app, "pm2 restarted app");
            Ok(())
        })
    }

    fn describe<'a>(&'a self, app: &'a str) -> BoxFuture<'a, ManagerResult<ProcessInfo>> {
        Box::pin(async move {
            let jlist = self.run(&["jlist"]).await?;
            parse_jlist(&jlist, app, epoch_millis())
        })
    }
}

/// Find `app` in `pm2 jlist` output and compute its uptime at `now_ms`.
///
/// Clustered apps appear once per instance; the youngest instance wins.
fn parse_jlist(jlist: &str, app: &str, now_ms: u64) -> ManagerResult<ProcessInfo> {
    // pm2 may print banner lines before the JSON document.
    let start = jlist
        .find('[')
        .ok_or_else(|| ManagerError::Malformed("no process list in `pm2 jlist` output".into()))?;
    let processes: Vec<Pm2Process> = serde_json::from_str(&jlist[start..])
        .map_err(|e| ManagerError::Malformed(e.to_string()))?;

    processes
        .iter()
        .filter(|p| p.name == app)
        .map(|p| {
            let started = p.pm2_env.pm_uptime.unwrap_or(now_ms);
            Duration::from_millis(now_ms.saturating_sub(started))
        })
        .min()
        .map(|uptime| ProcessInfo { uptime })
        .ok_or_else(|| ManagerError::NotFound(app.to_string()))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
