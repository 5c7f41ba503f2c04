//! Debounced, coalesced quota resync actor. Generalizes the teacher's
//! `DbUpdateActor` (mpsc-driven, debounce-per-key, force path, flush on
//! shutdown) from rebuilding a repo/arch database to recomputing a
//! user's quota from their `File` records — the same coalescing need
//! shows up when a cleanup sweep soft-deletes a burst of files for one
//! user and each deletion would otherwise trigger its own resync.

use crate::event::{Event, EventSink};
use crate::models::UserId;
use crate::quota_accountant::QuotaAccountant;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

#[derive(Debug)]
enum QuotaResyncMessage {
    RequestResync(UserId),
    ForceResync(UserId),
    Shutdown,
}

/// Handle for sending messages to the actor.
#[derive(Clone)]
pub struct QuotaResyncHandle {
    tx: mpsc::Sender<QuotaResyncMessage>,
}

impl QuotaResyncHandle {
    /// Fire-and-forget: coalesced with the debounce window.
    pub async fn request_resync(&self, user_id: UserId) {
        let _ = self.tx.send(QuotaResyncMessage::RequestResync(user_id)).await;
    }

    /// Fire-and-forget: bypasses the debounce, resyncs as soon as the
    /// actor's select loop next wakes.
    pub async fn force_resync(&self, user_id: UserId) {
        let _ = self.tx.send(QuotaResyncMessage::ForceResync(user_id)).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(QuotaResyncMessage::Shutdown).await;
    }
}

struct PendingResync {
    first_requested: Instant,
    last_requested: Instant,
}

pub struct QuotaResyncActor {
    rx: mpsc::Receiver<QuotaResyncMessage>,
    quota: Arc<QuotaAccountant>,
    events: Arc<dyn EventSink>,
    pending: HashMap<UserId, PendingResync>,
    debounce_duration: Duration,
}

impl QuotaResyncActor {
    const DEFAULT_DEBOUNCE_SECS: u64 = 10;
    const CHANNEL_CAPACITY: usize = 100;

    pub fn new(quota: Arc<QuotaAccountant>, events: Arc<dyn EventSink>) -> (Self, QuotaResyncHandle) {
        Self::with_debounce(quota, events, Duration::from_secs(Self::DEFAULT_DEBOUNCE_SECS))
    }

    pub fn with_debounce(
        quota: Arc<QuotaAccountant>,
        events: Arc<dyn EventSink>,
        debounce_duration: Duration,
    ) -> (Self, QuotaResyncHandle) {
        let (tx, rx) = mpsc::channel(Self::CHANNEL_CAPACITY);
        let actor = Self { rx, quota, events, pending: HashMap::new(), debounce_duration };
        (actor, QuotaResyncHandle { tx })
    }

    pub async fn run(mut self) {
        loop {
            let timeout = self.next_timeout();

            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(QuotaResyncMessage::RequestResync(user_id)) => self.handle_request(user_id),
                        Some(QuotaResyncMessage::ForceResync(user_id)) => {
                            self.pending.remove(&user_id);
                            self.resync(&user_id).await;
                        }
                        Some(QuotaResyncMessage::Shutdown) | None => {
                            self.flush_all_pending().await;
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    self.process_ready().await;
                }
            }
        }
    }

    fn handle_request(&mut self, user_id: UserId) {
        let now = Instant::now();
        self.pending
            .entry(user_id)
            .and_modify(|pending| pending.last_requested = now)
            .or_insert_with(|| PendingResync { first_requested: now, last_requested: now });
    }

    fn next_timeout(&self) -> Duration {
        if self.pending.is_empty() {
            return Duration::from_secs(3600);
        }
        let now = Instant::now();
        self.pending
            .values()
            .map(|p| (p.last_requested + self.debounce_duration).saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::from_millis(100))
            .max(Duration::from_millis(100))
    }

    async fn process_ready(&mut self) {
        let now = Instant::now();
        let ready: Vec<UserId> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.last_requested) >= self.debounce_duration)
            .map(|(user_id, _)| user_id.clone())
            .collect();

        for user_id in ready {
            self.pending.remove(&user_id);
            self.resync(&user_id).await;
        }
    }

    async fn flush_all_pending(&mut self) {
        let user_ids: Vec<UserId> = self.pending.keys().cloned().collect();
        for user_id in user_ids {
            self.pending.remove(&user_id);
            self.resync(&user_id).await;
        }
    }

    async fn resync(&self, user_id: &UserId) {
        if let Err(error) = self.quota.sync_from_files(user_id).await {
            self.events.emit(Event::AsyncSideEffectFailed {
                operation: "quota_resync",
                error: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use crate::metadata::MetadataStore;
    use crate::models::Role;
    use tempfile::TempDir;

    #[tokio::test]
    async fn coalesced_requests_resync_once_after_debounce() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::open(dir.path()).await.unwrap());
        let quota = Arc::new(QuotaAccountant::new(metadata.clone(), Arc::new(NullEventSink), crate::config::QuotaConfig::default()));
        let user_id = UserId::generate();
        quota.add_file(&user_id, Role::Free, &crate::models::QuotaOverride::default(), 100).await.unwrap();

        let (actor, handle) = QuotaResyncActor::with_debounce(quota.clone(), Arc::new(NullEventSink), Duration::from_millis(20));
        let join = tokio::spawn(actor.run());

        handle.request_resync(user_id.clone()).await;
        handle.request_resync(user_id.clone()).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;
        let _ = join.await;

        let summary = quota.get_summary(&user_id);
        assert_eq!(summary.usage.storage, 0);
    }
}
