//! Validators judge a probe response after a successful fetch.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::transport::ProbeResponse;

type PredicateFn = dyn Fn(&ProbeResponse) -> Result<(), String> + Send + Sync;

/// A single check applied to a response body.
#[derive(Clone)]
pub enum Validator {
    /// Body text must contain this literal.
    Contains(String),
    /// Body text must match this pattern.
    Matches(Regex),
    /// Arbitrary check over the whole response.
    Predicate(Arc<PredicateFn>),
}

impl Validator {
    pub fn contains(needle: impl Into<String>) -> Self {
        Validator::Contains(needle.into())
    }

    /// Compile `pattern` into a pattern validator.
    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Validator::Matches)
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&ProbeResponse) -> Result<(), String> + Send + Sync + 'static,
    {
        Validator::Predicate(Arc::new(f))
    }

    /// Returns the failure description if the response does not pass.
    pub fn validate(&self, response: &ProbeResponse) -> Result<(), String> {
        match self {
            Validator::Contains(needle) => {
                if response.text.contains(needle.as_str()) {
                    Ok(())
                } else {
                    Err(format!("Failed to find required string: \"{needle}\""))
                }
            }
            Validator::Matches(re) => {
                if re.is_match(&response.text) {
                    Ok(())
                } else {
                    Err(format!("Failed to find required pattern: \"{}\"", re.as_str()))
                }
            }
            Validator::Predicate(f) => f(response),
        }
    }
}

impl From<&str> for Validator {
    fn from(needle: &str) -> Self {
        Validator::contains(needle)
    }
}

impl From<String> for Validator {
    fn from(needle: String) -> Self {
        Validator::Contains(needle)
    }
}

impl From<Regex> for Validator {
    fn from(re: Regex) -> Self {
        Validator::Matches(re)
    }
}

impl PartialEq for Validator {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Validator::Contains(a), Validator::Contains(b)) => a == b,
            (Validator::Matches(a), Validator::Matches(b)) => a.as_str() == b.as_str(),
            (Validator::Predicate(a), Validator::Predicate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Contains(s) => f.debug_tuple("Contains").field(s).finish(),
            Validator::Matches(re) => f.debug_tuple("Matches").field(&re.as_str()).finish(),
            Validator::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
