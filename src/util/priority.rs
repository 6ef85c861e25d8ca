//! Priority levels shared by requirements and schedule entries.

use serde::{Deserialize, Serialize};

/// Relative importance of a requirement or a scheduled run. An entry takes
/// the highest level among its requirements.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Optional requirements.
    #[default]
    Normal,
    /// Required for the run to make progress.
    High,
}
