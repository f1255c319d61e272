//! In-process pub/sub fanning job-step events to WebSocket subscribers
//! by job id. Publish never blocks: a subscriber whose backlog is full
//! is dropped to protect the producer. Late subscribers see only events
//! published after they joined.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{JobStatus, JobStep};

/// Bounded backlog per subscriber before it is considered slow.
const SUBSCRIBER_BACKLOG: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub video_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<JobStep>,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl ProgressEvent {
    pub fn new(
        job_id: &str,
        video_id: &str,
        status: JobStatus,
        step: Option<JobStep>,
        progress: u8,
        message: Option<String>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            video_id: video_id.to_string(),
            status,
            step,
            progress,
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Default)]
pub struct ProgressBus {
    subscribers: DashMap<String, Vec<mpsc::Sender<ProgressEvent>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one job's events. Dropping the receiver
    /// unsubscribes on the next publish.
    pub fn subscribe(&self, job_id: &str) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BACKLOG);
        self.subscribers
            .entry(job_id.to_string())
            .or_default()
            .push(tx);
        debug!(job_id, "progress subscriber added");
        rx
    }

    /// Publish to all subscribers of the event's job id. Within one
    /// subscription the channel preserves publish order.
    pub fn publish(&self, event: &ProgressEvent) {
        let Some(mut entry) = self.subscribers.get_mut(&event.job_id) else {
            return;
        };
        entry.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job_id = %event.job_id, "dropping slow progress subscriber");
                false
            }
        });
    }

    /// Drop the subscriber list once a job reaches a terminal state and
    /// the terminal event has been delivered.
    pub fn close_job(&self, job_id: &str) {
        self.subscribers.remove(job_id);
    }

    #[cfg(test)]
    fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers.get(job_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(job_id: &str, progress: u8) -> ProgressEvent {
        ProgressEvent::new(job_id, "V1", JobStatus::Processing, Some(JobStep::GenerateTts), progress, None)
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe("J1");
        bus.publish(&event("J1", 10));
        bus.publish(&event("J1", 30));
        assert_eq!(rx.recv().await.unwrap().progress, 10);
        assert_eq!(rx.recv().await.unwrap().progress, 30);
    }

    #[tokio::test]
    async fn events_are_scoped_to_job_id() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe("J1");
        bus.publish(&event("J2", 50));
        bus.publish(&event("J1", 10));
        assert_eq!(rx.recv().await.unwrap().progress, 10);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_publish() {
        let bus = ProgressBus::new();
        let rx = bus.subscribe("J1");
        drop(rx);
        bus.publish(&event("J1", 10));
        assert_eq!(bus.subscriber_count("J1"), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe("J1");
        for i in 0..(SUBSCRIBER_BACKLOG + 1) {
            bus.publish(&event("J1", (i % 100) as u8));
        }
        // overflow dropped the subscriber; the backlog remains readable
        assert_eq!(bus.subscriber_count("J1"), 0);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn late_subscriber_sees_no_history() {
        let bus = ProgressBus::new();
        bus.publish(&event("J1", 10));
        let mut rx = bus.subscribe("J1");
        bus.publish(&event("J1", 30));
        assert_eq!(rx.recv().await.unwrap().progress, 30);
    }
}
