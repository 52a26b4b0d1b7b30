use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One entry in a booking's audit trail. Appended on every lifecycle transition,
/// never updated.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BookingChangeEvent {
    pub booking_id: Uuid,
    pub action: String,
    pub actor: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl BookingChangeEvent {
    pub fn new(booking_id: Uuid, action: &str, actor: &str) -> Self {
        Self {
            booking_id,
            action: action.to_string(),
            actor: actor.to_string(),
            from_status: None,
            to_status: None,
            note: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn transition(mut self, from: impl ToString, to: impl ToString) -> Self {
        self.from_status = Some(from.to_string());
        self.to_status = Some(to.to_string());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}
