//! pmwatch.toml configuration parser.
//!
//! ```toml
//! frequency = 1000
//!
//! [[watch]]
//! apps = ["web"]
//! action = "restart"
//! restart_delay = 5000
//!
//! [[watch.rules]]
//! url = "http://localhost:8080/"
//! timeout = 2000
//! contains = ["OK"]
//! matches = ["^Hello"]
//! ```
//!
//! All durations are milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::rule::{HttpRule, Rule, RuleSet};
use crate::supervisor::Supervisor;
use crate::validator::Validator;
use crate::watcher::{Action, Apps, WatchOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PmwatchConfig {
    pub frequency: Option<u64>,
    #[serde(default, rename = "watch")]
    pub watches: Vec<WatchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub apps: Vec<String>,
    #[serde(default)]
    pub action: Action,
    pub restart_delay: Option<u64>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub url: String,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub matches: Vec<String>,
}

impl PmwatchConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply the frequency and register every watch on `supervisor`.
    ///
    /// Every watch is validated and its rules built before anything is
    /// registered, so a bad entry leaves the supervisor untouched.
    pub fn install(&self, supervisor: &Supervisor) -> ConfigResult<usize> {
        let watches = self
            .watches
            .iter()
            .map(|w| -> ConfigResult<_> {
                let apps = Apps::from(w.apps.clone());
                apps.validate()?;
                Ok((w, apps, w.ruleset()?))
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        if let Some(ms) = self.frequency {
            supervisor.set_frequency(Duration::from_millis(ms));
        }

        for (watch, apps, ruleset) in watches {
            supervisor.add_with(
                apps,
                ruleset,
                watch.action,
                WatchOptions {
                    restart_delay: watch.restart_delay.map(Duration::from_millis),
                },
            )?;
        }

        info!(watches = self.watches.len(), "configuration installed");
        Ok(self.watches.len())
    }
}

impl WatchConfig {
    fn ruleset(&self) -> ConfigResult<RuleSet> {
        self.rules.iter().map(RuleConfig::rule).collect()
    }
}

impl RuleConfig {
    fn rule(&self) -> ConfigResult<Rule> {
        let mut rule = HttpRule::new(self.url.as_str()).validators(self.contains.iter().cloned());
        for pattern in &self.matches {
            let validator = Validator::matches(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            rule = rule.validator(validator);
        }
        if let Some(ms) = self.timeout {
            rule = rule.timeout(Duration::from_millis(ms));
        }
        Ok(Rule::Http(rule))
    }
}
