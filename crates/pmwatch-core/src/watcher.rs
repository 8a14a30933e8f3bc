//! Watchers and the registry that holds them.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, WatchError};
use crate::rule::RuleSet;

/// Prefix for generated ids of multi-app watchers.
pub const GENERATED_ID_PREFIX: &str = "pmwatch-";

/// What to do when a watcher's rules fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Action {
    /// Report the failure only.
    None,
    /// Restart every app of the watcher through the process manager.
    #[default]
    Restart,
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Action::None),
            "restart" => Ok(Action::Restart),
            other => Err(ConfigError::UnknownAction(other.to_string())),
        }
    }
}

impl TryFrom<String> for Action {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Optional per-watcher settings merged in at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Skip restarts while any app has been up for less than this.
    pub restart_delay: Option<Duration>,
}

impl WatchOptions {
    pub fn restart_delay(delay: Duration) -> Self {
        Self {
            restart_delay: Some(delay),
        }
    }
}

/// One or more process-manager app names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apps(Vec<String>);

impl Apps {
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }

    /// Reject an empty list or a blank name.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.0.is_empty() {
            return Err(WatchError::NoApps);
        }
        if self.0.iter().any(|a| a.trim().is_empty()) {
            return Err(WatchError::BlankApp);
        }
        Ok(())
    }
}

impl From<&str> for Apps {
    fn from(app: &str) -> Self {
        Apps(vec![app.to_string()])
    }
}

impl From<String> for Apps {
    fn from(app: String) -> Self {
        Apps(vec![app])
    }
}

impl From<Vec<String>> for Apps {
    fn from(apps: Vec<String>) -> Self {
        Apps(apps)
    }
}

impl From<Vec<&str>> for Apps {
    fn from(apps: Vec<&str>) -> Self {
        Apps(apps.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Apps {
    fn from(apps: &[&str]) -> Self {
        Apps(apps.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Apps {
    fn from(apps: [&str; N]) -> Self {
        Apps(apps.iter().map(|s| s.to_string()).collect())
    }
}

/// A group of apps with the rules that decide their health.
#[derive(Debug)]
pub struct Watcher {
    /// Registry-unique, unlike `id`.
    pub(crate) serial: u64,
    id: String,
    apps: Vec<String>,
    ruleset: RuleSet,
    action: Action,
    restart_delay: Option<Duration>,
}

impl Watcher {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn apps(&self) -> &[String] {
        &self.apps
    }

    pub fn ruleset(&self) -> &RuleSet {
        &self.ruleset
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn restart_delay(&self) -> Option<Duration> {
        self.restart_delay
    }
}

/// The set of active watchers.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watchers: Vec<Arc<Watcher>>,
    next_id: u64,
    next_serial: u64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher and return it.
    ///
    /// Single-app watchers take the app name as id; multi-app watchers
    /// get a generated one. Ids are not deduplicated.
    pub fn add(
        &mut self,
        apps: Apps,
        ruleset: RuleSet,
        action: Action,
        options: WatchOptions,
    ) -> Result<Arc<Watcher>, WatchError> {
        apps.validate()?;
        let apps = apps.into_inner();

        let id = if let [only] = apps.as_slice() {
            only.clone()
        } else {
            let id = format!("{GENERATED_ID_PREFIX}{}", self.next_id);
            self.next_id += 1;
            id
        };

        let watcher = Arc::new(Watcher {
            serial: self.next_serial,
            id,
            apps,
            ruleset,
            action,
            restart_delay: options.restart_delay,
        });
        self.next_serial += 1;

        debug!(
            watcher = %watcher.id,
            apps = ?watcher.apps,
            rules = watcher.ruleset.len(),
            "watcher registered"
        );
        self.watchers.push(watcher.clone());
        Ok(watcher)
    }

    /// Remove every watcher.
    pub fn clear(&mut self) {
        self.watchers.clear();
    }

    /// Point-in-time view used by a cycle.
    pub fn snapshot(&self) -> Vec<Arc<Watcher>> {
        self.watchers.clone()
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;

    fn add(reg: &mut WatchRegistry, apps: impl Into<Apps>) -> Arc<Watcher> {
        reg.add(
            apps.into(),
            RuleSet::new(),
            Action::default(),
            WatchOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn single_app_uses_app_name_as_id() {
        let mut reg = WatchRegistry::new();
        let w = add(&mut reg, "web");
        assert_eq!(w.id(), "web");
        assert_eq!(w.apps(), ["web".to_string()]);
        assert_eq!(w.action(), Action::Restart);
        assert_eq!(w.restart_delay(), None);
    }

    #[test]
    fn multi_app_ids_are_sequential() {
        let mut reg = WatchRegistry::new();
        let a = add(&mut reg, ["api", "worker"]);
        let _ = add(&mut reg, "web");
        let b = add(&mut reg, vec!["db", "cache"]);
        assert_eq!(a.id(), "pmwatch-0");
        assert_eq!(b.id(), "pmwatch-1");
    }

    #[test]
    fn same_app_twice_is_not_deduplicated() {
        let mut reg = WatchRegistry::new();
        let a = add(&mut reg, "web");
        let b = add(&mut reg, "web");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.serial, b.serial);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn empty_or_blank_apps_are_rejected() {
        let mut reg = WatchRegistry::new();
        let empty = reg.add(
            Apps::from(Vec::<String>::new()),
            RuleSet::new(),
            Action::Restart,
            WatchOptions::default(),
        );
        assert_eq!(empty.unwrap_err(), WatchError::NoApps);

        let blank = reg.add(
            Apps::from(["web", " "]),
            RuleSet::new(),
            Action::Restart,
            WatchOptions::default(),
        );
        assert_eq!(blank.unwrap_err(), WatchError::BlankApp);
        assert!(reg.is_empty());
    }

    #[test]
    fn options_are_merged() {
        let mut reg = WatchRegistry::new();
        let w = reg
            .add(
                "web".into(),
                Rule::get("http://localhost/").into(),
                Action::None,
                WatchOptions::restart_delay(Duration::from_secs(3)),
            )
            .unwrap();
        assert_eq!(w.action(), Action::None);
        assert_eq!(w.restart_delay(), Some(Duration::from_secs(3)));
        assert_eq!(w.ruleset().len(), 1);
    }

    #[test]
    fn snapshot_is_independent_of_later_adds() {
        let mut reg = WatchRegistry::new();
        add(&mut reg, "web");
        let snap = reg.snapshot();
        add(&mut reg, "api");
        assert_eq!(snap.len(), 1);

        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn action_parsing() {
        assert_eq!("none".parse::<Action>().unwrap(), Action::None);
        assert_eq!("restart".parse::<Action>().unwrap(), Action::Restart);
        let err = "reboot".parse::<Action>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown watcher action: reboot");
    }
}
