use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ChatTurn,
    Security,
    Feedback,
}

/// One telemetry event as shipped to the backend. The payload shape is
/// per-type; the envelope is shared.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub trace_id: String,
    pub conversation_id: String,
    pub turn_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dept_id: Option<String>,
    pub occurred_at: String,
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    pub fn new(
        event_type: EventType,
        trace_id: &str,
        conversation_id: &str,
        turn_id: &str,
        user_id: &str,
        dept_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            trace_id: trace_id.to_string(),
            conversation_id: conversation_id.to_string(),
            turn_id: turn_id.to_string(),
            user_id: user_id.to_string(),
            dept_id: dept_id.map(str::to_string),
            occurred_at: Utc::now().to_rfc3339(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelope_serialises() {
        let e = TelemetryEvent::new(
            EventType::ChatTurn,
            "t1",
            "c1",
            "turn1",
            "u1",
            Some("hr"),
            serde_json::json!({"route": "RAG_INTERNAL"}),
        );
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event_type"], "CHAT_TURN");
        assert_eq!(json["dept_id"], "hr");
        assert!(json["event_id"].as_str().is_some());
    }
}
