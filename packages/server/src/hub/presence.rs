//! Presence write-behind.
//!
//! The engine never awaits the [`PresenceStore`]. It queues writes on a [`PresenceWriter`] and a
//! single [`PresenceWorker`] task applies them in queue order, each bounded by a timeout, so the
//! last write for a user is the one that sticks.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};

use crate::domain::{PresenceStatus, PresenceStore, UserId};

#[derive(Debug)]
enum PresenceUpdate {
    Write {
        user_id: UserId,
        status: PresenceStatus,
    },
    /// Answered once every earlier write has been applied.
    Flush(oneshot::Sender<()>),
}

/// Non-blocking front of the presence worker.
#[derive(Debug, Clone)]
pub struct PresenceWriter {
    tx: mpsc::Sender<PresenceUpdate>,
}

impl PresenceWriter {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        capacity: usize,
        timeout: Duration,
    ) -> (Self, PresenceWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, PresenceWorker { rx, store, timeout })
    }

    pub fn set_online(&self, user_id: UserId) {
        self.enqueue(PresenceUpdate::Write {
            user_id,
            status: PresenceStatus::Online,
        });
    }

    pub fn set_offline(&self, user_id: UserId) {
        self.enqueue(PresenceUpdate::Write {
            user_id,
            status: PresenceStatus::Offline,
        });
    }

    /// `reply` fires after every write queued before it; it is dropped if the queue is full.
    pub fn flush(&self, reply: oneshot::Sender<()>) {
        self.enqueue(PresenceUpdate::Flush(reply));
    }

    fn enqueue(&self, update: PresenceUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                tracing::warn!("Presence queue full, dropping {:?}", update);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Presence worker has stopped");
            }
        }
    }
}

/// Applies queued presence writes until every [`PresenceWriter`] is dropped.
pub struct PresenceWorker {
    rx: mpsc::Receiver<PresenceUpdate>,
    store: Arc<dyn PresenceStore>,
    timeout: Duration,
}

impl PresenceWorker {
    pub async fn run(mut self) {
        while let Some(update) = self.rx.recv().await {
            match update {
                PresenceUpdate::Write { user_id, status } => self.apply(&user_id, status).await,
                PresenceUpdate::Flush(reply) => {
                    let _ = reply.send(());
                }
            }
        }
        tracing::debug!("Presence worker stopped");
    }

    async fn apply(&self, user_id: &UserId, status: PresenceStatus) {
        let write = async {
            match status {
                PresenceStatus::Online => self.store.set_online(user_id).await,
                PresenceStatus::Offline => self.store.set_offline(user_id).await,
            }
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(user_id = %user_id, %status, "Failed to record presence: {}", e)
            }
            Err(_) => tracing::warn!(
                user_id = %user_id,
                %status,
                "Presence store did not answer within {:?}",
                self.timeout
            ),
        }
    }
}
