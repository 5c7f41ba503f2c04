//! Structured observability events. Nothing in the engine layer calls
//! `tracing` or `metrics` directly — every component takes a `Arc<dyn
//! EventSink>` at construction and emits through it instead, per
//! SPEC_FULL.md §A. This keeps logging/metrics a pluggable collaborator,
//! not a hardwired side effect of business logic.

use std::time::Duration;

/// One structured domain event. Variants carry exactly the fields a reader
/// (log line, metric, alert rule) would need — no free-text blobs.
#[derive(Debug, Clone)]
pub enum Event {
    ChunkAccepted { session_id: String, chunk_index: u32, size: u64 },
    ChunkRejected { session_id: String, chunk_index: u32, reason: &'static str },
    SessionCompleted { session_id: String, file_id: String, size: u64, duration: Duration },
    SessionFailed { session_id: String, reason: String },
    FileExpired { file_id: String, user_id: String },
    MigrationAttempted { file_id: String, from: &'static str, to: &'static str },
    MigrationFailed { file_id: String, error: String },
    RateLimited { identifier: String, limit_type: &'static str, retry_after: u64 },
    AbuseBlocked { ip: String, score: u64 },
    QuotaBreached { user_id: String, usage: u64, limit: i64 },
    WorkerBatchSummary { worker: &'static str, processed: usize, failed: usize, duration: Duration },
    AsyncSideEffectFailed { operation: &'static str, error: String },
}

/// Sink that an `Event` is emitted through. Implementations decide how
/// (and whether) to render, record, or forward each variant.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default production sink: renders through `tracing` with the same
/// structured-field style the teacher uses throughout, and records a
/// handful of `metrics` gauges/counters alongside.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match event {
            Event::ChunkAccepted { session_id, chunk_index, size } => {
                tracing::debug!(session_id = %session_id, chunk_index, size, "chunk accepted");
                metrics::counter!("tiervault_chunks_accepted_total").increment(1);
            }
            Event::ChunkRejected { session_id, chunk_index, reason } => {
                tracing::warn!(session_id = %session_id, chunk_index, reason, "chunk rejected");
                metrics::counter!("tiervault_chunks_rejected_total").increment(1);
            }
            Event::SessionCompleted { session_id, file_id, size, duration } => {
                tracing::info!(
                    session_id = %session_id,
                    file_id = %file_id,
                    size,
                    duration_ms = duration.as_millis() as u64,
                    "upload session completed"
                );
                metrics::counter!("tiervault_uploads_completed_total").increment(1);
                metrics::histogram!("tiervault_upload_bytes").record(size as f64);
            }
            Event::SessionFailed { session_id, reason } => {
                tracing::warn!(session_id = %session_id, reason = %reason, "upload session failed");
                metrics::counter!("tiervault_uploads_failed_total").increment(1);
            }
            Event::FileExpired { file_id, user_id } => {
                tracing::info!(file_id = %file_id, user_id = %user_id, "file expired and swept");
                metrics::counter!("tiervault_files_expired_total").increment(1);
            }
            Event::MigrationAttempted { file_id, from, to } => {
                tracing::info!(file_id = %file_id, from, to, "tier migration attempted");
            }
            Event::MigrationFailed { file_id, error } => {
                tracing::error!(file_id = %file_id, error = %error, "tier migration failed");
                metrics::counter!("tiervault_migrations_failed_total").increment(1);
            }
            Event::RateLimited { identifier, limit_type, retry_after } => {
                tracing::warn!(
                    identifier = %identifier,
                    limit_type,
                    retry_after,
                    "rate limit exceeded"
                );
                metrics::counter!("tiervault_rate_limited_total").increment(1);
            }
            Event::AbuseBlocked { ip, score } => {
                tracing::warn!(ip = %ip, score, "ip blocked for abuse");
                metrics::counter!("tiervault_abuse_blocked_total").increment(1);
            }
            Event::QuotaBreached { user_id, usage, limit } => {
                tracing::warn!(user_id = %user_id, usage, limit, "quota breached");
                metrics::counter!("tiervault_quota_breached_total").increment(1);
            }
            Event::WorkerBatchSummary { worker, processed, failed, duration } => {
                if processed > 0 || failed > 0 {
                    tracing::info!(
                        worker,
                        processed,
                        failed,
                        duration_ms = duration.as_millis() as u64,
                        "worker batch complete"
                    );
                }
                metrics::counter!("tiervault_worker_items_processed_total", "worker" => worker)
                    .increment(processed as u64);
                metrics::counter!("tiervault_worker_items_failed_total", "worker" => worker)
                    .increment(failed as u64);
            }
            Event::AsyncSideEffectFailed { operation, error } => {
                tracing::warn!(operation, error = %error, "fire-and-forget side effect failed");
            }
        }
    }
}

/// Sink that drops every event. Used by tests that don't care about
/// observability output and don't want to drag `tracing`'s global
/// subscriber into the picture.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) {}
}
