//! Durable, resumable background batch processing.
//!
//! A [`BackgroundProcess`] owns a queue of work items for a [`Task`]. Hosts push items into the
//! queue and dispatch a worker. The worker drains the queue in bounded slices. Each invocation
//! holds a TTL based process lock, stops when its time or memory budget is spent, when the job is
//! paused or when it is cancelled, and then re-dispatches itself to continue. A periodic health
//! check restarts draining if a dispatch was lost.
//!
//! ```text
//! push ─▶ save ─▶ dispatch ─▶ trigger ─▶ invocation ─┬─▶ complete
//!                    ▲                               │
//!                    └────────── re-dispatch ◀───────┘
//!                    ▲
//!               health check
//! ```
//!
//! The collaborators the engine needs are traits with provided implementations:
//!
//! - [`store::Store`]: the durable key-value store ([`store::memory::InMemoryStore`], and a
//!   Postgres store in the `offload-sqlx` crate),
//! - [`dispatch::Trigger`]: the asynchronous trigger ([`dispatch::in_process::InProcessTrigger`]
//!   and [`dispatch::http::HttpTrigger`]),
//! - [`scheduler::Scheduler`]: the recurring health check timer ([`scheduler::TokioScheduler`]),
//! - [`credentials::Credentials`]: one-time tokens and caller identity
//!   ([`credentials::OneTimeTokens`]),
//! - [`probe::MemoryProbe`]: process memory usage ([`probe::SystemMemory`]).
//!
//! # Example
//!
//! ```
//! use offload::prelude::*;
//!
//! struct Thumbnail;
//!
//! #[async_trait::async_trait]
//! impl Task for Thumbnail {
//!     type Item = String;
//!
//!     async fn execute(&self, path: Self::Item) -> TaskResult<Self::Item> {
//!         println!("generating thumbnail for {path}");
//!         TaskResult::Done
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), OffloadError> {
//! let trigger = InProcessTrigger::new();
//! let process = BackgroundProcess::builder("thumbnails", Thumbnail)
//!     .with_trigger(trigger.clone())
//!     .build();
//! process.register();
//! process.on_completed(|identifier| println!("{identifier} is done"));
//!
//! process
//!     .queue()
//!     .extend(["a.png".to_owned(), "b.png".to_owned()])
//!     .save_and_dispatch()
//!     .await?;
//!
//! trigger.wait_idle().await;
//! assert!(!process.is_queued().await?);
//! # Ok(())
//! # }
//! ```
use thiserror::Error;

pub mod batch;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod hooks;
mod lock;
pub mod prelude;
pub mod probe;
pub mod process;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod task;

pub use config::Config;
pub use process::{
    builder::ProcessBuilder,
    queue::Queue,
    runner::{Invocation, Skip, StopReason},
    BackgroundProcess,
};

use dispatch::TriggerError;
use store::StoreError;

#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("{0} is already processing")]
    AlreadyProcessing(String),
    #[error("Failed to trigger a worker")]
    Trigger(#[from] TriggerError),
    #[error("Error communicating with the store")]
    Store(#[from] StoreError),
    #[error("Error encoding or decoding value")]
    EncodeError(#[from] serde_json::Error),
    #[error("Invalid or reused token for {0}")]
    InvalidToken(String),
    #[error("Batch keys of {identifier} cannot fit in {max_length} characters")]
    KeyTooLong { identifier: String, max_length: usize },
}
