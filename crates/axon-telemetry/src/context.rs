//! Request-scoped telemetry context.
//!
//! One `TurnContext` is created per in-flight request and owned by it,
//! so concurrent turns cannot leak each other's ids. For streaming
//! responses the context is held inside the body stream and flushed
//! after the last byte, not on header return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

use crate::events::{EventType, TelemetryEvent};

pub struct TurnContext {
    pub trace_id: String,
    pub conversation_id: String,
    pub turn_id: String,
    pub user_id: String,
    pub dept_id: Option<String>,
    chat_turn_emitted: AtomicBool,
    security_emitted: AtomicBool,
    feedback_emitted: AtomicBool,
    queued: Mutex<Vec<TelemetryEvent>>,
}

impl TurnContext {
    pub fn new(conversation_id: &str, user_id: &str, dept_id: Option<&str>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            turn_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            dept_id: dept_id.map(str::to_string),
            chat_turn_emitted: AtomicBool::new(false),
            security_emitted: AtomicBool::new(false),
            feedback_emitted: AtomicBool::new(false),
            queued: Mutex::new(Vec::new()),
        }
    }

    fn flag(&self, event_type: EventType) -> &AtomicBool {
        match event_type {
            EventType::ChatTurn => &self.chat_turn_emitted,
            EventType::Security => &self.security_emitted,
            EventType::Feedback => &self.feedback_emitted,
        }
    }

    /// Queue an event of `event_type`. At most one per type per turn;
    /// later attempts are no-ops and return false.
    pub fn record(&self, event_type: EventType, payload: serde_json::Value) -> bool {
        if self.flag(event_type).swap(true, Ordering::SeqCst) {
            return false;
        }
        let event = TelemetryEvent::new(
            event_type,
            &self.trace_id,
            &self.conversation_id,
            &self.turn_id,
            &self.user_id,
            self.dept_id.as_deref(),
            payload,
        );
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        true
    }

    /// Drain queued events for forwarding. Emitted flags stay set, so a
    /// second drain cannot produce duplicates.
    pub fn take_events(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.queued.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn has_emitted(&self, event_type: EventType) -> bool {
        self.flag(event_type).load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_turn_is_recorded_once() {
        let ctx = TurnContext::new("c1", "u1", None);
        assert!(ctx.record(EventType::ChatTurn, serde_json::json!({"n": 1})));
        assert!(!ctx.record(EventType::ChatTurn, serde_json::json!({"n": 2})));
        let events = ctx.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["n"], 1);
    }

    #[test]
    fn security_and_chat_turn_are_independent() {
        let ctx = TurnContext::new("c1", "u1", None);
        assert!(ctx.record(EventType::Security, serde_json::json!({})));
        assert!(ctx.record(EventType::ChatTurn, serde_json::json!({})));
        assert_eq!(ctx.take_events().len(), 2);
    }

    #[test]
    fn drain_is_idempotent() {
        let ctx = TurnContext::new("c1", "u1", None);
        ctx.record(EventType::ChatTurn, serde_json::json!({}));
        assert_eq!(ctx.take_events().len(), 1);
        assert!(ctx.take_events().is_empty());
        // flag survives the drain
        assert!(ctx.has_emitted(EventType::ChatTurn));
    }

    #[test]
    fn turn_ids_are_unique_per_context() {
        let a = TurnContext::new("c1", "u1", None);
        let b = TurnContext::new("c1", "u1", None);
        assert_ne!(a.turn_id, b.turn_id);
        assert_ne!(a.trace_id, b.trace_id);
    }
}
