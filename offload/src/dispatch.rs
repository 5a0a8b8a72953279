//! The asynchronous trigger that starts a worker invocation.
//!
//! A dispatch is fire-and-forget: [`Trigger::trigger`] reports whether the trigger could be
//! issued, never the outcome of the work it starts. Two transports are provided:
//!
//! - [`in_process::InProcessTrigger`] spawns the invocation on the current tokio runtime, and
//! - [`http::HttpTrigger`] posts the [`TriggerRequest`] to an endpoint of the host, which hands
//!   it to [`crate::BackgroundProcess::handle_request`].
use std::{fmt::Display, sync::Weak};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::{IdentityContext, Token};

pub mod http;
pub mod in_process;

/// Identifies a chain of invocations started by one dispatch and continued by re-dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub(crate) fn generate() -> Self {
        Self(format!("{:016x}", rand::thread_rng().gen::<u64>()))
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a worker needs to start an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub identifier: String,
    pub token: Token,
    pub identity: IdentityContext,
    pub chain_id: ChainId,
}

/// The receiving side of a trigger: runs an invocation for a request.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: TriggerRequest);
}

/// The transport used to start worker invocations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Issue a trigger for `request` without waiting for the invocation it starts.
    async fn trigger(&self, request: TriggerRequest) -> Result<(), TriggerError>;

    /// Make `handler` reachable for triggers of `identifier`.
    ///
    /// Transports whose receiving side lives in the host ignore this.
    fn enroll(&self, _identifier: &str, _handler: Weak<dyn Handler>) {}

    /// Undo [`Trigger::enroll`].
    fn withdraw(&self, _identifier: &str) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("No handler enrolled for {0}")]
    NoHandler(String),
    #[error("Failed to issue trigger: {0}")]
    Transport(String),
}
