// Input combos and the frame-driven combo buffer

pub mod buffer;

pub use buffer::{BufferedCombo, FrameReport, InputComboBuffer};

use crate::event::InputId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Frames a combo stays live when no explicit TTL is given
pub const DEFAULT_ACTIVE_FRAMES: u32 = 8;

/// Eviction tier; lower tiers are evicted first when the buffer is over capacity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComboPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A recognized set of controls with a priority and a frame-based time-to-live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCombo {
    name: String,
    identifiers: BTreeSet<InputId>,
    priority: ComboPriority,
    active_frames: u32,
}

impl InputCombo {
    pub fn new<I, S>(name: impl Into<String>, identifiers: I, priority: ComboPriority) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InputId>,
    {
        Self {
            name: name.into(),
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            priority,
            active_frames: DEFAULT_ACTIVE_FRAMES,
        }
    }

    pub fn with_active_frames(mut self, active_frames: u32) -> Self {
        self.active_frames = active_frames;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifiers(&self) -> &BTreeSet<InputId> {
        &self.identifiers
    }

    pub fn priority(&self) -> ComboPriority {
        self.priority
    }

    pub fn active_frames(&self) -> u32 {
        self.active_frames
    }

    pub fn contains(&self, id: &InputId) -> bool {
        self.identifiers.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(ComboPriority::Low < ComboPriority::Normal);
        assert!(ComboPriority::Normal < ComboPriority::High);
        assert!(ComboPriority::High < ComboPriority::Critical);
        assert_eq!(ComboPriority::default(), ComboPriority::Normal);
    }

    #[test]
    fn test_combo_defaults() {
        let combo = InputCombo::new("jump-kick", ["A", "B", "A"], ComboPriority::High);
        assert_eq!(combo.active_frames(), DEFAULT_ACTIVE_FRAMES);
        assert_eq!(combo.identifiers().len(), 2);
        assert!(combo.contains(&InputId::new("B")));
        assert_eq!(combo.with_active_frames(3).active_frames(), 3);
    }
}
