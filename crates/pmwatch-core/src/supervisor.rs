//! Supervisor: the registry handle, cycle driver, and monitor loop.
//!
//! A `Supervisor` is a cheap cloneable handle. Independent supervisors
//! share nothing: each owns its registry, event bus, and restart
//! coordinator.
//!
//! # Monitor loop
//!
//! ```text
//! Idle ──monitor()──▶ Armed ──timer──▶ Running ──cycle done──▶ Armed ──▶ …
//! ```
//!
//! The next timer is armed only after the previous cycle, restarts
//! included, has finished, so cycles never overlap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{TransportError, WatchError};
use crate::event::{Event, EventBus};
use crate::manager::ProcessManager;
use crate::restart::RestartCoordinator;
use crate::rule::RuleSet;
use crate::transport::{HttpClient, HyperClient};
use crate::watcher::{Action, Apps, WatchOptions, WatchRegistry, Watcher};

/// Interval between cycles unless configured otherwise.
pub const DEFAULT_FREQUENCY: Duration = Duration::from_millis(1000);

/// Where the monitor loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// `monitor()` has not been called.
    Idle,
    /// Waiting for the next cycle timer.
    Armed,
    /// A monitor-driven cycle is in progress.
    Running,
}

/// Totals for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub watchers: usize,
    pub unhealthy: usize,
}

/// Handle to one supervisor instance.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Mutex<WatchRegistry>,
    bus: EventBus,
    client: Arc<dyn HttpClient>,
    coordinator: RestartCoordinator,
    frequency_ms: AtomicU64,
    state: Mutex<DriverState>,
}

impl Supervisor {
    /// Create a supervisor probing over HTTP or HTTPS with [`HyperClient`].
    pub fn new(manager: Arc<dyn ProcessManager>) -> Result<Self, TransportError> {
        Ok(Self::with_client(manager, Arc::new(HyperClient::new()?)))
    }

    pub fn with_client(manager: Arc<dyn ProcessManager>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(WatchRegistry::new()),
                bus: EventBus::new(),
                client,
                coordinator: RestartCoordinator::new(manager),
                frequency_ms: AtomicU64::new(DEFAULT_FREQUENCY.as_millis() as u64),
                state: Mutex::new(DriverState::Idle),
            }),
        }
    }

    /// Watch `apps` with `ruleset`, restarting them on failure.
    ///
    /// `ruleset` may be a single rule, a list of rules, or a bare URL as
    /// shorthand for `Rule::get(url)`.
    pub fn add(
        &self,
        apps: impl Into<Apps>,
        ruleset: impl Into<RuleSet>,
    ) -> Result<&Self, WatchError> {
        self.add_with(apps, ruleset, Action::default(), WatchOptions::default())
    }

    /// Like [`add`](Self::add) with an explicit action and options.
    pub fn add_with(
        &self,
        apps: impl Into<Apps>,
        ruleset: impl Into<RuleSet>,
        action: Action,
        options: WatchOptions,
    ) -> Result<&Self, WatchError> {
        let watcher = self.registry().add(apps.into(), ruleset.into(), action, options)?;
        self.inner.bus.publish(Event::Add(watcher));
        Ok(self)
    }

    /// Remove every watcher and detach every event subscriber.
    pub fn clear(&self) -> &Self {
        self.registry().clear();
        self.inner.bus.reset();
        debug!("supervisor cleared");
        self
    }

    /// Subscribe to supervisor events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn watchers(&self) -> Vec<Arc<Watcher>> {
        self.registry().snapshot()
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_millis(self.inner.frequency_ms.load(Ordering::Relaxed))
    }

    /// Change the cycle interval. Applies from the next re-arm.
    pub fn set_frequency(&self, frequency: Duration) -> &Self {
        self.inner
            .frequency_ms
            .store(frequency.as_millis() as u64, Ordering::Relaxed);
        self
    }

    pub fn state(&self) -> DriverState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one evaluation pass over the watchers registered right now.
    ///
    /// Resolves once every watcher has been checked and any restart it
    /// triggered has finished.
    pub async fn cycle(&self) -> CycleSummary {
        self.inner.bus.publish(Event::PreCycle);

        let snapshot = self.registry().snapshot();
        let mut tasks = JoinSet::new();
        for watcher in snapshot {
            let inner = self.inner.clone();
            tasks.spawn(async move { inner.check_watcher(watcher).await });
        }

        let mut summary = CycleSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(healthy) => {
                    summary.watchers += 1;
                    if !healthy {
                        summary.unhealthy += 1;
                    }
                }
                Err(e) => {
                    error!(error = %e, "watcher check task failed");
                    self.inner.bus.publish(Event::Error {
                        message: format!("Watcher check aborted - {e}"),
                    });
                }
            }
        }

        debug!(
            watchers = summary.watchers,
            unhealthy = summary.unhealthy,
            "cycle complete"
        );
        summary
    }

    /// Start the periodic monitor loop. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime. There is no stop: the
    /// loop runs for as long as the runtime does.
    pub fn monitor(&self) -> &Self {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != DriverState::Idle {
                debug!(state = ?*state, "monitor already armed");
                return self;
            }
            *state = DriverState::Armed;
        }

        info!(frequency_ms = self.frequency().as_millis() as u64, "monitor armed");
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run_monitor().await });
        self
    }

    async fn run_monitor(self) {
        loop {
            tokio::time::sleep(self.frequency()).await;
            self.set_state(DriverState::Running);
            self.cycle().await;
            self.set_state(DriverState::Armed);
        }
    }

    fn set_state(&self, next: DriverState) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, WatchRegistry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    /// Evaluate all rules of one watcher and act on failure.
    /// Returns whether the watcher was healthy.
    async fn check_watcher(&self, watcher: Arc<Watcher>) -> bool {
        let client = self.client.as_ref();
        let outcomes = join_all(watcher.ruleset().iter().map(|rule| rule.evaluate(client))).await;

        let failures: Vec<String> = outcomes
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        let healthy = failures.is_empty();
        let error = (!healthy).then(|| failures.join("; "));

        if let Some(reason) = &error {
            debug!(watcher = %watcher.id(), %reason, "watcher unhealthy");
        }
        self.bus.publish(Event::Check {
            id: watcher.id().to_string(),
            healthy,
            error,
        });

        if !healthy {
            self.coordinator.handle(&watcher, &self.bus).await;
        }
        healthy
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::rule::{HttpRule, Rule};
    use crate::testing::{FakeClient, FakeManager, drain, names};
    use crate::validator::Validator;

    fn supervisor(client: FakeClient) -> (Supervisor, Arc<FakeManager>) {
        let manager = Arc::new(FakeManager::default());
        (Supervisor::with_client(manager.clone(), Arc::new(client)), manager)
    }

    fn checks(events: &[Event]) -> Vec<(String, bool, Option<String>)> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Check { id, healthy, error } => Some((id.clone(), *healthy, error.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn empty_ruleset_is_always_healthy() {
        let (sup, manager) = supervisor(FakeClient::default());
        sup.add("web", RuleSet::new()).unwrap();
        let mut rx = sup.subscribe();

        for _ in 0..3 {
            sup.cycle().await;
        }

        let events = drain(&mut rx);
        assert_eq!(checks(&events), vec![("web".to_string(), true, None); 3]);
        assert!(manager.restarted().is_empty());
    }

    #[tokio::test]
    async fn add_emits_add_event_and_chains() {
        let (sup, _) = supervisor(FakeClient::default());
        let mut rx = sup.subscribe();

        sup.add("web", "http://web/")
            .unwrap()
            .add(["api", "worker"], RuleSet::new())
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(names(&events), ["add", "add"]);
        match &events[1] {
            Event::Add(w) => assert_eq!(w.id(), "pmwatch-0"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(sup.watchers().len(), 2);
    }

    #[tokio::test]
    async fn failing_rule_checks_then_restarts() {
        let client = FakeClient::default().route("http://web/", 500, "boom");
        let (sup, manager) = supervisor(client);
        sup.add("web", "http://web/").unwrap();
        let mut rx = sup.subscribe();

        let summary = sup.cycle().await;

        let events = drain(&mut rx);
        assert_eq!(names(&events), ["preCycle", "check", "restart", "postRestart"]);
        assert_eq!(
            checks(&events),
            [("web".to_string(), false, Some("Status Code = 500".to_string()))]
        );
        assert_eq!(manager.restarted(), ["web"]);
        assert_eq!(summary, CycleSummary { watchers: 1, unhealthy: 1 });
    }

    #[tokio::test]
    async fn failure_reasons_are_joined() {
        let client = FakeClient::default()
            .route("http://a/", 500, "")
            .route("http://b/", 200, "Hello World");
        let (sup, _) = supervisor(client);
        let rules = vec![
            Rule::get("http://a/"),
            Rule::Http(HttpRule::new("http://b/").validator(Validator::matches("^Bye").unwrap())),
            Rule::get("http://b/"),
        ];
        sup.add_with("web", rules, Action::None, WatchOptions::default())
            .unwrap();
        let mut rx = sup.subscribe();

        sup.cycle().await;

        assert_eq!(
            checks(&drain(&mut rx)),
            [(
                "web".to_string(),
                false,
                Some("Status Code = 500; Failed to find required pattern: \"^Bye\"".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn action_none_reports_without_restarting() {
        let client = FakeClient::default().route("http://web/", 503, "");
        let (sup, manager) = supervisor(client);
        sup.add_with("web", "http://web/", Action::None, WatchOptions::default())
            .unwrap();
        let mut rx = sup.subscribe();

        sup.cycle().await;

        assert_eq!(names(&drain(&mut rx)), ["preCycle", "check"]);
        assert!(manager.restarted().is_empty());
    }

    #[tokio::test]
    async fn restart_delay_defers_young_apps() {
        let client = FakeClient::default().route("http://web/", 500, "");
        let manager = Arc::new(FakeManager {
            uptimes: HashMap::from([("web".to_string(), Duration::from_millis(100))]),
            ..Default::default()
        });
        let sup = Supervisor::with_client(manager.clone(), Arc::new(client));
        sup.add_with(
            "web",
            "http://web/",
            Action::Restart,
            WatchOptions::restart_delay(Duration::from_secs(10)),
        )
        .unwrap();
        let mut rx = sup.subscribe();

        sup.cycle().await;

        assert_eq!(names(&drain(&mut rx)), ["preCycle", "check", "restartDelay"]);
        assert!(manager.restarted().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_watchers_and_subscribers() {
        let (sup, _) = supervisor(FakeClient::default());
        sup.add("web", RuleSet::new()).unwrap();
        let mut stale = sup.subscribe();

        sup.clear();
        assert_eq!(stale.try_recv().unwrap_err(), TryRecvError::Closed);
        assert_eq!(sup.events().subscriber_count(), 0);

        let mut rx = sup.subscribe();
        let summary = sup.cycle().await;

        assert_eq!(names(&drain(&mut rx)), ["preCycle"]);
        assert_eq!(summary, CycleSummary::default());
    }

    #[tokio::test]
    async fn independent_supervisors_share_nothing() {
        let (a, _) = supervisor(FakeClient::default());
        let (b, _) = supervisor(FakeClient::default());
        a.add("web", RuleSet::new()).unwrap();
        a.set_frequency(Duration::from_millis(10));

        assert!(b.watchers().is_empty());
        assert_eq!(b.frequency(), DEFAULT_FREQUENCY);
    }

    #[tokio::test]
    async fn monitor_is_idempotent() {
        let (sup, _) = supervisor(FakeClient::default());
        sup.set_frequency(Duration::from_millis(100));
        assert_eq!(sup.state(), DriverState::Idle);

        let mut rx = sup.subscribe();
        sup.monitor().monitor();
        assert_eq!(sup.state(), DriverState::Armed);

        tokio::time::sleep(Duration::from_millis(250)).await;

        // One loop fires at ~100ms and ~200ms; two loops would double that.
        let cycles = names(&drain(&mut rx))
            .into_iter()
            .filter(|n| *n == "preCycle")
            .count();
        assert!((1..=2).contains(&cycles), "saw {cycles} cycles");
    }

    #[tokio::test]
    async fn monitor_picks_up_frequency_changes() {
        let (sup, _) = supervisor(FakeClient::default());
        sup.set_frequency(Duration::from_millis(20));
        let mut rx = sup.subscribe();
        sup.monitor();

        tokio::time::sleep(Duration::from_millis(70)).await;
        sup.set_frequency(Duration::from_secs(60));
        // Let the in-flight timer (at most 20ms) fire once more.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = drain(&mut rx).len();
        assert!(before >= 2, "saw {before} events");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn watchers_added_mid_cycle_wait_for_next_cycle() {
        // Unknown URL never answers, so this watcher keeps the cycle open.
        let (sup, _) = supervisor(FakeClient::default());
        sup.add_with(
            "slow",
            Rule::Http(HttpRule::new("http://slow/").timeout(Duration::from_millis(50))),
            Action::None,
            WatchOptions::default(),
        )
        .unwrap();
        let mut rx = sup.subscribe();

        let running = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        sup.add("late", RuleSet::new()).unwrap();

        let summary = running.await.unwrap();
        assert_eq!(summary.watchers, 1);
        let ids: Vec<_> = checks(&drain(&mut rx)).into_iter().map(|c| c.0).collect();
        assert_eq!(ids, ["slow"]);
    }
}
