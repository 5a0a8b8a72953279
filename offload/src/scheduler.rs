//! The recurring timer behind the health checker.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// The callback a [`Scheduler`] runs on every tick.
pub type Tick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs a callback at a fixed interval, keyed by an identifier.
#[cfg_attr(test, mockall::automock)]
pub trait Scheduler: Send + Sync {
    /// Run `callback` every `interval` under `identifier`.
    ///
    /// Registering an identifier that is already registered leaves the existing registration in
    /// place.
    fn register(&self, identifier: &str, interval: Duration, callback: Tick);

    /// Stop the timer registered under `identifier`, if any.
    fn deregister(&self, identifier: &str);

    /// When the timer registered under `identifier` fires next.
    fn next_fire_time(&self, identifier: &str) -> Option<DateTime<Utc>>;
}

struct Registration {
    cancellation_token: CancellationToken,
    next: Arc<Mutex<DateTime<Utc>>>,
}

/// A [`Scheduler`] running one tokio task per registration.
///
/// Clones share their registrations. A tick runs to completion before the next interval starts,
/// so ticks for one identifier never overlap.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    registrations: Arc<Mutex<HashMap<String, Registration>>>,
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let identifiers = self
            .registrations
            .lock()
            .map(|registrations| registrations.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        f.debug_struct("TokioScheduler")
            .field("registrations", &identifiers)
            .finish()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

fn after(interval: Duration) -> DateTime<Utc> {
    Utc::now() + TimeDelta::from_std(interval).unwrap_or(TimeDelta::zero())
}

impl Scheduler for TokioScheduler {
    fn register(&self, identifier: &str, interval: Duration, callback: Tick) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(%identifier, "Cannot schedule {identifier} outside of a tokio runtime");
            return;
        };
        let Ok(mut registrations) = self.registrations.lock() else {
            tracing::error!(%identifier, "Failed to schedule {identifier}, scheduler in bad state");
            return;
        };
        if registrations.contains_key(identifier) {
            return;
        }

        let cancellation_token = CancellationToken::new();
        let next = Arc::new(Mutex::new(after(interval)));
        runtime.spawn({
            let cancellation_token = cancellation_token.clone();
            let next = next.clone();
            let identifier = identifier.to_owned();
            async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            if let Ok(mut next) = next.lock() {
                                *next = after(interval);
                            }
                            tracing::trace!(%identifier, "Running scheduled tick for {identifier}");
                            callback().await;
                        }
                        _ = cancellation_token.cancelled() => {
                            tracing::debug!(%identifier, "Shutting down schedule for {identifier}");
                            break;
                        }
                    }
                }
            }
        });
        registrations.insert(
            identifier.to_owned(),
            Registration {
                cancellation_token,
                next,
            },
        );
    }

    fn deregister(&self, identifier: &str) {
        let registration = match self.registrations.lock() {
            Ok(mut registrations) => registrations.remove(identifier),
            Err(_) => None,
        };
        if let Some(registration) = registration {
            registration.cancellation_token.cancel();
        }
    }

    fn next_fire_time(&self, identifier: &str) -> Option<DateTime<Utc>> {
        self.registrations
            .lock()
            .ok()?
            .get(identifier)
            .and_then(|registration| registration.next.lock().ok().map(|next| *next))
    }
}
