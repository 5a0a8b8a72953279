//! The purpose of this module is to alleviate the need to import many of the `[offload]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use offload::prelude::*;
//! ```
pub use crate::batch::Batch;
pub use crate::config::Config;
pub use crate::credentials::{Credentials, IdentityContext, OneTimeTokens, Token};
pub use crate::dispatch::{
    http::HttpTrigger, in_process::InProcessTrigger, Trigger, TriggerError, TriggerRequest,
};
pub use crate::hooks::HookId;
pub use crate::probe::{MemoryProbe, SystemMemory};
pub use crate::scheduler::{Scheduler, TokioScheduler};
pub use crate::status::Status;
pub use crate::store::{memory::InMemoryStore, Store, StoreError};
pub use crate::task::{Task, TaskError, TaskResult};
pub use crate::{BackgroundProcess, Invocation, OffloadError, StopReason};
