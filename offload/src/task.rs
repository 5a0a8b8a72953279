use std::{error::Error, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// The unit of work the batch runner applies to every queued item.
///
/// # Example
///
/// ```
/// # use offload::prelude::*;
/// struct ResizeImages;
///
/// #[async_trait::async_trait]
/// impl Task for ResizeImages {
///     type Item = String;
///
///     async fn execute(&self, path: Self::Item) -> TaskResult<Self::Item> {
///         println!("resizing {path}");
///         TaskResult::Done
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// The type of the queued items.
    ///
    /// Items are persisted between invocations so must be serializable. They are cloned before
    /// the task is handed one so that a failing task never loses its item.
    type Item: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Process a single item.
    ///
    /// Return [`TaskResult::Done`] to drop the item, or [`TaskResult::Requeue`] to put an item
    /// back at the front of the batch to be run again on the next iteration.
    async fn execute(&self, item: Self::Item) -> TaskResult<Self::Item>;

    /// Whether the invocation has used up its time budget.
    ///
    /// Consulted after every item. `limit` is [`crate::Config::time_limit`].
    fn time_exceeded(&self, elapsed: Duration, limit: Option<Duration>) -> bool {
        limit.is_some_and(|limit| elapsed >= limit)
    }

    /// Whether the invocation has used up its memory budget.
    ///
    /// Consulted after every item while [`crate::Config::memory_threshold`] is set. `threshold`
    /// is that setting and `ceiling` is the memory ceiling in bytes, resolved once per invocation.
    fn memory_exceeded(&self, usage: u64, ceiling: u64, threshold: Option<f64>) -> bool {
        threshold.is_some_and(|threshold| usage as f64 >= ceiling as f64 * threshold)
    }
}

/// The outcome of [`Task::execute`].
pub enum TaskResult<I> {
    /// The item is finished and is removed from the queue.
    Done,
    /// Put this item back at the front of the batch.
    Requeue(I),
    /// The task failed. The item stays queued and the invocation stops.
    Error(Box<dyn TaskError>),
}

impl<I, T> From<T> for TaskResult<I>
where
    T: TaskError + 'static,
{
    fn from(value: T) -> Self {
        Self::Error(Box::new(value))
    }
}

pub trait TaskError: Error + Send + Sync {
    fn error_type(&self) -> &'static str;
}

/// A task failure as it is logged and reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub error_type: &'static str,
    pub message: String,
}

const ERROR_TYPE_PANIC: &str = "panic";

impl From<Box<dyn TaskError>> for TaskFailure {
    fn from(value: Box<dyn TaskError>) -> Self {
        Self {
            error_type: value.error_type(),
            message: value.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for TaskFailure {
    fn from(value: tokio::task::JoinError) -> Self {
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self {
            error_type: ERROR_TYPE_PANIC,
            message,
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug)]
    pub(crate) struct MockError(pub String);

    impl std::fmt::Display for MockError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl Error for MockError {}
    impl TaskError for MockError {
        fn error_type(&self) -> &'static str {
            "custom"
        }
    }

    /// What [`Recorder`] should do with an item.
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    pub(crate) enum Step {
        Done(String),
        RequeueAs(String, Box<Step>),
        Sleep(String, Duration),
        Fail(String),
        Panic(String),
    }

    impl Step {
        pub(crate) fn name(&self) -> &str {
            match self {
                Step::Done(name)
                | Step::RequeueAs(name, _)
                | Step::Sleep(name, _)
                | Step::Fail(name)
                | Step::Panic(name) => name,
            }
        }
    }

    /// A task that records the items it was run with.
    #[derive(Default, Clone)]
    pub(crate) struct Recorder {
        pub(crate) seen: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub(crate) fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Task for Recorder {
        type Item = Step;

        async fn execute(&self, item: Self::Item) -> TaskResult<Self::Item> {
            self.seen.lock().unwrap().push(item.name().to_owned());
            match item {
                Step::Done(_) => TaskResult::Done,
                Step::RequeueAs(_, next) => TaskResult::Requeue(*next),
                Step::Sleep(_, delay) => {
                    tokio::time::sleep(delay).await;
                    TaskResult::Done
                }
                Step::Fail(name) => MockError(format!("{name} failed")).into(),
                Step::Panic(name) => panic!("{name} panicked"),
            }
        }
    }

    #[test]
    fn default_time_check() {
        let task = Recorder::default();

        assert!(!task.time_exceeded(Duration::from_secs(19), Some(Duration::from_secs(20))));
        assert!(task.time_exceeded(Duration::from_secs(20), Some(Duration::from_secs(20))));
        assert!(task.time_exceeded(Duration::ZERO, Some(Duration::ZERO)));
        assert!(!task.time_exceeded(Duration::from_secs(3600), None));
    }

    #[test]
    fn default_memory_check() {
        let task = Recorder::default();

        assert!(!task.memory_exceeded(89, 100, Some(0.9)));
        assert!(task.memory_exceeded(90, 100, Some(0.9)));
        assert!(!task.memory_exceeded(100, 100, None));
    }

    #[tokio::test]
    async fn panics_are_classified() {
        let failure: TaskFailure = tokio::spawn(async { panic!("boom") })
            .await
            .unwrap_err()
            .into();

        assert_eq!(
            failure,
            TaskFailure {
                error_type: "panic",
                message: "boom".to_owned(),
            }
        );
    }

    #[test]
    fn errors_are_classified() {
        let error: Box<dyn TaskError> = Box::new(MockError("nope".to_owned()));

        let failure = TaskFailure::from(error);

        assert_eq!(failure.error_type, "custom");
        assert_eq!(failure.to_string(), "custom: nope");
    }
}
