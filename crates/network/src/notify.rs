//! Live status notifications over a tokio broadcast channel.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use tidemark_core::{DataId, NodeState};

use crate::error::ServiceError;
use crate::services::MessageQueue;

/// One status change of a data id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: DataId,
    pub status: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// [`MessageQueue`] fanning notifications out to in-process subscribers.
///
/// Slow subscribers lose the oldest messages once `capacity` is exceeded.
pub struct BroadcastQueue {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive notifications for `ids` only; an empty set receives all.
    pub fn subscribe(&self, ids: impl IntoIterator<Item = DataId>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            ids: ids.into_iter().collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, id: &DataId, status: NodeState, reason: Option<&str>) {
        let notification = Notification {
            id: id.clone(),
            status,
            reason: reason.map(str::to_string),
        };
        // An error only means nobody is listening.
        if self.tx.send(notification).is_err() {
            debug!(node = %id, %status, "No subscribers for notification");
        }
    }
}

#[async_trait]
impl MessageQueue for BroadcastQueue {
    async fn push_running(&self, id: &DataId) -> Result<(), ServiceError> {
        self.send(id, NodeState::Running, None);
        Ok(())
    }

    async fn push_run_failed(&self, id: &DataId, reason: &str) -> Result<(), ServiceError> {
        self.send(id, NodeState::Failed, Some(reason));
        Ok(())
    }

    async fn push_run_finish(&self, id: &DataId) -> Result<(), ServiceError> {
        self.send(id, NodeState::Finished, None);
        Ok(())
    }

    async fn push_system_failed(&self, id: &DataId, reason: &str) -> Result<(), ServiceError> {
        self.send(id, NodeState::SystemFailed, Some(reason));
        Ok(())
    }
}

/// Filtered receiving end of a [`BroadcastQueue`].
pub struct Subscription {
    rx: broadcast::Receiver<Notification>,
    ids: HashSet<DataId>,
}

impl Subscription {
    /// Next matching notification; `None` once the queue is dropped.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.ids.is_empty() || self.ids.contains(&n.id) => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching notification already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(n) if self.ids.is_empty() || self.ids.contains(&n.id) => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, notifications dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_only_their_ids() {
        let queue = BroadcastQueue::new(16);
        let mut p1 = queue.subscribe([DataId::from("p1")]);
        let mut all = queue.subscribe(Vec::<DataId>::new());
        assert_eq!(queue.subscriber_count(), 2);

        queue.push_running(&"p2".into()).await.unwrap();
        queue.push_run_failed(&"p1".into(), "bad input").await.unwrap();

        let got = p1.recv().await.unwrap();
        assert_eq!(got.status, NodeState::Failed);
        assert_eq!(got.reason.as_deref(), Some("bad input"));
        assert!(p1.try_recv().is_none());

        assert_eq!(all.recv().await.unwrap().id.as_str(), "p2");
        assert_eq!(all.recv().await.unwrap().id.as_str(), "p1");
    }

    #[tokio::test]
    async fn push_without_subscribers_is_ok() {
        let queue = BroadcastQueue::new(4);
        assert!(queue.push_run_finish(&"p1".into()).await.is_ok());
    }

    #[test]
    fn wire_format() {
        let n = Notification { id: "p1".into(), status: NodeState::SystemFailed, reason: None };
        assert_eq!(
            serde_json::to_string(&n).unwrap(),
            r#"{"id":"p1","status":"system-failed"}"#
        );
    }
}
