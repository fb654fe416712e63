// Input payloads carried by input-category events

use crate::input::InputCombo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a physical or logical control ("A", "LEFT_STICK_X", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputId(String);

impl InputId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InputId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InputId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchPhase {
    Down,
    Moved,
    Up,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputKind {
    Button {
        control: InputId,
        pressed: bool,
    },
    Axis {
        control: InputId,
        value: f32,
    },
    Touch {
        pointer: u32,
        x: f32,
        y: f32,
        phase: TouchPhase,
    },
    /// A recognized combo, emitted by the combo trigger
    Action {
        combo: String,
        controls: Vec<InputId>,
        frame: u64,
    },
}

/// Input sample tagged with the player slot it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub slot: u8,
    pub timestamp: DateTime<Utc>,
    pub kind: InputKind,
}

impl InputEvent {
    pub fn new(slot: u8, kind: InputKind) -> Self {
        Self {
            slot,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn button(slot: u8, control: impl Into<InputId>, pressed: bool) -> Self {
        Self::new(
            slot,
            InputKind::Button {
                control: control.into(),
                pressed,
            },
        )
    }

    pub fn axis(slot: u8, control: impl Into<InputId>, value: f32) -> Self {
        Self::new(
            slot,
            InputKind::Axis {
                control: control.into(),
                value,
            },
        )
    }

    pub fn touch(slot: u8, pointer: u32, x: f32, y: f32, phase: TouchPhase) -> Self {
        Self::new(slot, InputKind::Touch { pointer, x, y, phase })
    }

    pub fn action(slot: u8, combo: &InputCombo, frame: u64) -> Self {
        Self::new(
            slot,
            InputKind::Action {
                combo: combo.name().to_string(),
                controls: combo.identifiers().iter().cloned().collect(),
                frame,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ComboPriority;

    #[test]
    fn test_button_event() {
        let event = InputEvent::button(1, "START", true);
        assert_eq!(event.slot, 1);
        assert_eq!(
            event.kind,
            InputKind::Button {
                control: InputId::new("START"),
                pressed: true
            }
        );
    }

    #[test]
    fn test_action_carries_sorted_controls() {
        let combo = InputCombo::new("hadouken", ["RIGHT", "DOWN", "P"], ComboPriority::High);
        let event = InputEvent::action(0, &combo, 42);
        match event.kind {
            InputKind::Action {
                combo,
                controls,
                frame,
            } => {
                assert_eq!(combo, "hadouken");
                assert_eq!(frame, 42);
                let names: Vec<&str> = controls.iter().map(InputId::as_str).collect();
                assert_eq!(names, vec!["DOWN", "P", "RIGHT"]);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_input_kind_serializes_with_tag() {
        let event = InputEvent::touch(0, 3, 10.0, 20.0, TouchPhase::Down);
        let json = serde_json::to_value(&event.kind).unwrap();
        assert_eq!(json["type"], "touch");
        assert_eq!(json["phase"], "down");
    }
}
