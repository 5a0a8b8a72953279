//! The persisted control flag of a job.
use std::fmt::Display;

/// The control state of a job.
///
/// Only [`Status::Paused`] and [`Status::Cancelled`] are ever written to the store; [`Status::Idle`]
/// is the absence of a stored flag.
///
/// ```text
/// Idle ──pause──▶ Paused ──resume──▶ Idle
///   │               │
///   └────cancel─────┴──▶ Cancelled ──sweep──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Idle,
    Paused,
    Cancelled,
}

const STORED_CANCELLED: i64 = 1;
const STORED_PAUSED: i64 = 2;

impl Status {
    /// Decode the stored flag. Unknown values read as [`Status::Idle`].
    pub(crate) fn from_stored(value: Option<&serde_json::Value>) -> Self {
        match value.and_then(serde_json::Value::as_i64) {
            Some(STORED_CANCELLED) => Self::Cancelled,
            Some(STORED_PAUSED) => Self::Paused,
            _ => Self::Idle,
        }
    }

    /// The value to store for this status, [`None`] meaning the flag should be removed.
    pub(crate) fn to_stored(self) -> Option<serde_json::Value> {
        match self {
            Self::Idle => None,
            Self::Paused => Some(STORED_PAUSED.into()),
            Self::Cancelled => Some(STORED_CANCELLED.into()),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Paused => write!(f, "paused"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn stored_values() {
        assert_eq!(Status::Idle.to_stored(), None);
        assert_eq!(Status::Paused.to_stored(), Some(json!(2)));
        assert_eq!(Status::Cancelled.to_stored(), Some(json!(1)));
    }

    #[test]
    fn from_stored_values() {
        assert_eq!(Status::from_stored(None), Status::Idle);
        assert_eq!(Status::from_stored(Some(&json!(1))), Status::Cancelled);
        assert_eq!(Status::from_stored(Some(&json!(2))), Status::Paused);
        assert_eq!(Status::from_stored(Some(&json!("paused"))), Status::Idle);
        assert_eq!(Status::from_stored(Some(&json!(7))), Status::Idle);
    }
}
