use std::fmt;

use serde::{Deserialize, Serialize};

/// Worker lifecycle.
///
/// ```text
/// New -> Installing -> Waiting -> Activating -> Active
///             |                       |
///             v                       v
///         Redundant                Waiting (sweep failed, retryable)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    New,
    Installing,
    /// Installed, not yet controlling pages.
    Waiting,
    Activating,
    /// Controlling pages and intercepting their requests.
    Active,
    /// Install failed; this worker never activates.
    Redundant,
}

impl LifecycleState {
    pub fn can_install(&self) -> bool {
        matches!(self, LifecycleState::New)
    }

    pub fn can_activate(&self) -> bool {
        matches!(self, LifecycleState::Waiting)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }

    pub fn intercepts_fetch(&self) -> bool {
        self.is_active()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::New => "new",
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}
