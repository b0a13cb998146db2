//! In-process fan-out of task and run notifications.
//!
//! Delivery is best-effort and at-most-once. Each subscriber owns a bounded
//! queue; a subscriber whose queue is closed or full at publish time is
//! dropped from the registry instead of slowing the publisher down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::core::transition::StatusNotice;
use crate::core::types::{ErrorKind, RunMode, RunStatus, TaskStatus};
use crate::io::store::{Run, TaskUpdate};

/// Terminal details attached to a run projection once the run finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub error_kind: ErrorKind,
    pub error_message: Option<String>,
    pub finished_at: Option<String>,
}

/// Public view of a run carried by `run_status_changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProjection {
    pub id: String,
    pub task_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    #[serde(flatten)]
    pub outcome: Option<RunOutcome>,
}

impl RunProjection {
    /// Identity and status only.
    pub fn brief(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            task_id: run.task_id.clone(),
            mode: run.mode,
            status: run.status,
            outcome: None,
        }
    }

    /// Identity, status and outcome fields.
    pub fn finished(run: &Run) -> Self {
        Self {
            outcome: Some(RunOutcome {
                error_kind: run.error_kind,
                error_message: run.error_message.clone(),
                finished_at: run.finished_at.clone(),
            }),
            ..Self::brief(run)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusChanged {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_round: Option<u32>,
}

impl TaskStatusChanged {
    pub fn new(task_id: impl Into<String>, notice: StatusNotice) -> Self {
        Self {
            task_id: task_id.into(),
            status: notice.status,
            fix_round: notice.fix_round,
        }
    }
}

impl From<&TaskUpdate> for TaskStatusChanged {
    fn from(update: &TaskUpdate) -> Self {
        Self::new(update.task_id.clone(), update.notice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RunStatusChanged(RunProjection),
    TaskStatusChanged(TaskStatusChanged),
}

impl Notification {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::RunStatusChanged(_) => "run_status_changed",
            Notification::TaskStatusChanged(_) => "task_status_changed",
        }
    }

    pub fn data_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Notification::RunStatusChanged(run) => serde_json::to_string(run),
            Notification::TaskStatusChanged(task) => serde_json::to_string(task),
        }
    }
}

struct Registry {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Notification>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Registry {
    fn remove(&self, id: u64) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
            .is_some()
    }
}

/// Cloneable handle to the subscriber registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// `buffer` is the per-subscriber queue depth; zero is treated as one.
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a new subscriber. Dropping the returned handle unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.registry.buffer);
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, sender);
        debug!(subscriber = id, "subscriber added");
        Subscription {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Deliver `notification` to every current subscriber.
    ///
    /// Never fails and never blocks. Returns how many subscribers accepted it.
    pub fn publish(&self, notification: Notification) -> usize {
        let targets: Vec<(u64, mpsc::Sender<Notification>)> = self
            .registry
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, event = notification.name(), "subscriber queue full, dropping");
                    dead.push(id);
                }
                Err(TrySendError::Closed(_)) => dead.push(id),
            }
        }
        for id in dead {
            self.registry.remove(id);
        }
        debug!(event = notification.name(), delivered, "published");
        delivered
    }

    pub fn run_changed(&self, projection: RunProjection) -> usize {
        self.publish(Notification::RunStatusChanged(projection))
    }

    pub fn task_changed(&self, change: TaskStatusChanged) -> usize {
        self.publish(Notification::TaskStatusChanged(change))
    }
}

/// Receiving end of one subscriber.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Notification>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next notification; `None` once the subscriber has been dropped from
    /// the registry and its queue is drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    /// Everything currently queued, in publish order.
    pub fn drain(&mut self) -> Vec<Notification> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade()
            && registry.remove(self.id)
        {
            debug!(subscriber = self.id, "subscriber removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_change(status: TaskStatus, fix_round: Option<u32>) -> Notification {
        Notification::TaskStatusChanged(TaskStatusChanged {
            task_id: "t1".to_string(),
            status,
            fix_round,
        })
    }

    #[test]
    fn every_subscriber_receives_in_order() {
        let events = Broadcaster::new(8);
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        assert_eq!(events.publish(task_change(TaskStatus::Done, None)), 2);
        assert_eq!(events.publish(task_change(TaskStatus::Failed, None)), 2);

        for sub in [&mut a, &mut b] {
            let got = sub.drain();
            assert_eq!(
                got,
                vec![
                    task_change(TaskStatus::Done, None),
                    task_change(TaskStatus::Failed, None)
                ]
            );
        }
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let events = Broadcaster::new(8);
        let sub = events.subscribe();
        let _other = events.subscribe();
        assert_eq!(events.subscriber_count(), 2);
        drop(sub);
        assert_eq!(events.subscriber_count(), 1);
        assert_eq!(events.publish(task_change(TaskStatus::Plan, None)), 1);
    }

    /// A subscriber that stops reading is removed, others keep receiving.
    #[test]
    fn full_queue_drops_only_that_subscriber() {
        let events = Broadcaster::new(1);
        let _stalled = events.subscribe();
        let mut live = events.subscribe();

        assert_eq!(events.publish(task_change(TaskStatus::Plan, None)), 2);
        assert!(live.try_recv().is_some());

        assert_eq!(events.publish(task_change(TaskStatus::Done, None)), 1);
        assert_eq!(events.subscriber_count(), 1);
        assert_eq!(live.drain(), vec![task_change(TaskStatus::Done, None)]);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let events = Broadcaster::new(4);
        assert_eq!(events.publish(task_change(TaskStatus::Done, None)), 0);
    }

    #[test]
    fn wire_shapes() {
        let task = task_change(TaskStatus::InProgress, Some(3));
        assert_eq!(task.name(), "task_status_changed");
        let data: serde_json::Value =
            serde_json::from_str(&task.data_json().expect("json")).expect("parse");
        assert_eq!(
            data,
            json!({"taskId": "t1", "status": "in_progress", "fix_round": 3})
        );

        let without_round: serde_json::Value = serde_json::from_str(
            &task_change(TaskStatus::Done, None).data_json().expect("json"),
        )
        .expect("parse");
        assert_eq!(without_round, json!({"taskId": "t1", "status": "done"}));

        let mut run = RunProjection {
            id: "r1".to_string(),
            task_id: "t1".to_string(),
            mode: RunMode::Verify,
            status: RunStatus::Queued,
            outcome: None,
        };
        let brief = Notification::RunStatusChanged(run.clone());
        assert_eq!(brief.name(), "run_status_changed");
        let data: serde_json::Value =
            serde_json::from_str(&brief.data_json().expect("json")).expect("parse");
        assert_eq!(
            data,
            json!({"id": "r1", "taskId": "t1", "mode": "VERIFY", "status": "queued"})
        );

        run.status = RunStatus::Failed;
        run.outcome = Some(RunOutcome {
            error_kind: ErrorKind::TestFailed,
            error_message: Some("X".to_string()),
            finished_at: Some("2026-01-01T00:00:00.000000Z".to_string()),
        });
        let data: serde_json::Value = serde_json::from_str(
            &Notification::RunStatusChanged(run).data_json().expect("json"),
        )
        .expect("parse");
        assert_eq!(
            data,
            json!({
                "id": "r1", "taskId": "t1", "mode": "VERIFY", "status": "failed",
                "errorKind": "test_failed", "errorMessage": "X",
                "finishedAt": "2026-01-01T00:00:00.000000Z"
            })
        );
    }
}
