//! Fakes shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};

use crate::BoxFuture;
use crate::error::{ManagerError, ManagerResult};
use crate::event::Event;
use crate::manager::{ProcessInfo, ProcessManager};
use crate::transport::{HttpClient, ProbeResponse};

/// In-memory process manager that records restarts.
#[derive(Default)]
pub(crate) struct FakeManager {
    pub uptimes: HashMap<String, Duration>,
    pub failing: HashSet<String>,
    pub refuse_connect: bool,
    pub restarted: Mutex<Vec<String>>,
    /// When set, each restart waits for a notification.
    pub gate: Option<Arc<Notify>>,
}

impl FakeManager {
    pub fn restarted(&self) -> Vec<String> {
        self.restarted.lock().unwrap().clone()
    }
}

impl ProcessManager for FakeManager {
    fn connect(&self) -> BoxFuture<'_, ManagerResult<()>> {
        Box::pin(async move {
            if self.refuse_connect {
                Err(ManagerError::Unavailable("daemon down".into()))
            } else {
                Ok(())
            }
        })
    }

    fn restart<'a>(&'a self, app: &'a str) -> BoxFuture<'a, ManagerResult<()>> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.restarted.lock().unwrap().push(app.to_string());
            if self.failing.contains(app) {
                Err(ManagerError::Command {
                    command: format!("pm2 restart {app}"),
                    stderr: "process not found".into(),
                })
            } else {
                Ok(())
            }
        })
    }

    fn describe<'a>(&'a self, app: &'a str) -> BoxFuture<'a, ManagerResult<ProcessInfo>> {
        Box::pin(async move {
            self.uptimes
                .get(app)
                .map(|&uptime| ProcessInfo { uptime })
                .ok_or_else(|| ManagerError::NotFound(app.to_string()))
        })
    }
}

/// Answers by URL; unknown URLs never respond.
#[derive(Default)]
pub(crate) struct FakeClient {
    pub routes: HashMap<String, ProbeResponse>,
}

impl FakeClient {
    pub fn route(mut self, url: &str, status: u16, text: &str) -> Self {
        self.routes
            .insert(url.to_string(), ProbeResponse::text(status, text));
        self
    }
}

impl HttpClient for FakeClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ProbeResponse, String>> {
        match self.routes.get(url).cloned() {
            Some(resp) => Box::pin(async move { Ok(resp) }),
            None => Box::pin(std::future::pending()),
        }
    }
}

pub(crate) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}

pub(crate) fn names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::name).collect()
}
