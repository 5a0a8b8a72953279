//! Anti-forgery tokens and caller identity for triggered invocations.
//!
//! Every dispatch carries a one-time [`Token`] bound to the job identifier together with the
//! [`IdentityContext`] of the caller, so that the worker executes with the same authorization
//! as the request that queued the work.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

const TOKEN_LENGTH: usize = 32;
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// A one-time anti-forgery token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The session or identity of a caller, as opaque named values (for example session cookies).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityContext(BTreeMap<String, String>);

impl IdentityContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Issues and validates tokens, and captures and restores caller identity.
pub trait Credentials: Send + Sync {
    /// Issue a new one-time token bound to `identifier`.
    fn issue_token(&self, identifier: &str) -> Token;

    /// Check `token` was issued for `identifier` and is still valid, consuming it.
    fn verify_token(&self, identifier: &str, token: &Token) -> bool;

    /// The identity of the current caller, sent along with a dispatch.
    fn capture_identity(&self) -> IdentityContext {
        IdentityContext::default()
    }

    /// Make `identity` the identity of the current invocation.
    fn restore_identity(&self, _identity: &IdentityContext) {}
}

/// The default [`Credentials`]: random tokens held in memory until used or expired.
///
/// Tokens are only valid within the process that issued them, which makes this suitable for
/// [`crate::dispatch::InProcessTrigger`] and for HTTP triggers back into the same process.
#[derive(Debug)]
pub struct OneTimeTokens {
    lifetime: Duration,
    issued: Mutex<HashMap<Token, (String, DateTime<Utc>)>>,
}

impl Default for OneTimeTokens {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_TOKEN_LIFETIME,
            issued: Default::default(),
        }
    }
}

impl OneTimeTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long an unused token stays valid. Defaults to 24 hours.
    pub fn with_lifetime(self, lifetime: Duration) -> Self {
        Self { lifetime, ..self }
    }
}

impl Credentials for OneTimeTokens {
    fn issue_token(&self, identifier: &str) -> Token {
        let token = Token(
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(TOKEN_LENGTH)
                .map(char::from)
                .collect(),
        );
        let expires_at = Utc::now() + TimeDelta::from_std(self.lifetime).unwrap_or(TimeDelta::zero());
        match self.issued.lock() {
            Ok(mut issued) => {
                let now = Utc::now();
                issued.retain(|_, (_, expires_at)| *expires_at > now);
                issued.insert(token.clone(), (identifier.to_owned(), expires_at));
            }
            Err(error) => tracing::error!(%error, %identifier, "Failed to record issued token"),
        }
        token
    }

    fn verify_token(&self, identifier: &str, token: &Token) -> bool {
        let Ok(mut issued) = self.issued.lock() else {
            return false;
        };
        match issued.remove(token) {
            Some((issued_for, expires_at)) => issued_for == identifier && expires_at > Utc::now(),
            None => false,
        }
    }
}
