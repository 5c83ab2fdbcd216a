use serde::Serialize;
use std::fmt;

use crate::zone::ZoneId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Pickup,
    Return,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pickup => "pickup",
            Action::Return => "return",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted when a zone flips state. The zone has already been updated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub action: Action,
    pub usage_count: u32,
}
