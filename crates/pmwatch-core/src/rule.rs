//! Health rules.
//!
//! A rule performs one observation and resolves to success or a
//! [`RuleError`]. Every rule races its observation against a timeout, so
//! a hung endpoint can never stall a cycle.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::BoxFuture;
use crate::error::RuleError;
use crate::transport::HttpClient;
use crate::validator::Validator;

/// Timeout applied to a rule unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

type CheckFn = dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync;

/// One executable health check.
#[derive(Clone, Debug, PartialEq)]
pub enum Rule {
    Http(HttpRule),
    Custom(CustomRule),
}

impl Rule {
    /// Shorthand for an HTTP GET rule with no validators.
    pub fn get(url: impl Into<String>) -> Self {
        Rule::Http(HttpRule::new(url))
    }

    /// Wrap an async check. `Err` carries the failure reason.
    pub fn custom<F, Fut>(check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Rule::Custom(CustomRule::new(check))
    }

    pub async fn evaluate(&self, client: &dyn HttpClient) -> Result<(), RuleError> {
        match self {
            Rule::Http(rule) => rule.evaluate(client).await,
            Rule::Custom(rule) => rule.evaluate().await,
        }
    }
}

/// GET a URL and judge the response.
///
/// The response must be a 200 and pass every validator. All validators
/// are evaluated so the failure lists every mismatch.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRule {
    url: String,
    validators: Vec<Validator>,
    timeout: Duration,
}

impl HttpRule {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            validators: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn validator(mut self, validator: impl Into<Validator>) -> Self {
        self.validators.push(validator.into());
        self
    }

    pub fn validators<I, V>(mut self, validators: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Validator>,
    {
        self.validators.extend(validators.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    pub fn validator_list(&self) -> &[Validator] {
        &self.validators
    }

    pub async fn evaluate(&self, client: &dyn HttpClient) -> Result<(), RuleError> {
        // The request future is dropped if the timer fires first.
        let response = match tokio::time::timeout(self.timeout, client.get(&self.url)).await {
            Err(_) => {
                debug!(
                    url = %self.url,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "probe timed out"
                );
                return Err(RuleError::TimedOut);
            }
            Ok(Err(reason)) => return Err(RuleError::Transport(reason)),
            Ok(Ok(response)) => response,
        };

        if response.status != 200 {
            debug!(url = %self.url, status = response.status, "probe non-200");
            return Err(RuleError::Status(response.status));
        }

        let failures: Vec<String> = self
            .validators
            .iter()
            .filter_map(|v| v.validate(&response).err())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            debug!(url = %self.url, failed = failures.len(), "probe validation failed");
            Err(RuleError::Validation(failures))
        }
    }
}

/// A user-supplied async check.
#[derive(Clone)]
pub struct CustomRule {
    check: Arc<CheckFn>,
    timeout: Duration,
}

impl CustomRule {
    pub fn new<F, Fut>(check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let check: Arc<CheckFn> =
            Arc::new(move || -> BoxFuture<'static, Result<(), String>> { Box::pin(check()) });
        Self {
            check,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn evaluate(&self) -> Result<(), RuleError> {
        match tokio::time::timeout(self.timeout, (self.check)()).await {
            Err(_) => Err(RuleError::TimedOut),
            Ok(result) => result.map_err(RuleError::Custom),
        }
    }
}

impl PartialEq for CustomRule {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.check, &other.check) && self.timeout == other.timeout
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Ordered rules that must all pass for a watcher to be healthy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleSet(Vec<Rule>);

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<Rule> {
        self.0
    }
}

impl Deref for RuleSet {
    type Target = [Rule];

    fn deref(&self) -> &[Rule] {
        &self.0
    }
}

/// A bare URL is shorthand for `Rule::get(url)`.
impl From<&str> for RuleSet {
    fn from(url: &str) -> Self {
        RuleSet(vec![Rule::get(url)])
    }
}

impl From<String> for RuleSet {
    fn from(url: String) -> Self {
        RuleSet(vec![Rule::get(url)])
    }
}

impl From<Rule> for RuleSet {
    fn from(rule: Rule) -> Self {
        RuleSet(vec![rule])
    }
}

impl From<HttpRule> for RuleSet {
    fn from(rule: HttpRule) -> Self {
        RuleSet(vec![Rule::Http(rule)])
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        RuleSet(rules)
    }
}

impl<const N: usize> From<[Rule; N]> for RuleSet {
    fn from(rules: [Rule; N]) -> Self {
        RuleSet(rules.into())
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        RuleSet(iter.into_iter().collect())
    }
}
