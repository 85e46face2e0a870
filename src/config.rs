//! Serializable loader configuration, for hosts that keep their batching
//! knobs in a config file rather than in code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::{BatchRules, Grouping, Window};

/// The tunable parts of a [`BatchRules`], without the batch function.
///
/// ```
/// use coalescer::{Grouping, LoaderSettings, Window};
///
/// let settings: LoaderSettings = serde_json::from_str(r#"{
///     "grouping": { "chunked": { "max_keys": 50 } },
///     "window": "yield",
///     "deadline_ms": 2000
/// }"#).unwrap();
///
/// assert_eq!(settings.window, Window::Yield);
/// assert!(matches!(settings.grouping, Grouping::Chunked { .. }));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSettings {
    pub grouping: Grouping,
    pub window: Window,
    pub deadline_ms: Option<u64>,
}

impl LoaderSettings {
    pub fn whole() -> Self {
        Self {
            grouping: Grouping::Whole,
            ..Self::default()
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Build the rules for a loader using these settings.
    pub fn rules<Batcher>(&self, batcher: Batcher) -> BatchRules<Batcher> {
        BatchRules {
            batcher,
            grouping: self.grouping,
            window: self.window,
            deadline: self.deadline(),
        }
    }
}
