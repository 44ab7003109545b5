use sluice_schemas::ProgressEvent;
use tracing::{info, instrument, warn};

/// A trait for handling progress events while a batch runs.
///
/// Implement this trait to forward progress to external systems, e.g. to
/// update a dashboard or collect run metrics.
///
/// # Examples
///
/// ```rust
/// use sluice_core::progress_tracker::ProgressTracker;
/// use sluice_schemas::ProgressEvent;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct LoadedRows(AtomicUsize);
///
/// impl ProgressTracker for LoadedRows {
///     fn on_progress(&self, event: ProgressEvent) {
///         if let ProgressEvent::DestinationLoaded { successful, .. } = event {
///             self.0.fetch_add(successful, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait ProgressTracker: Send + Sync {
    /// Called for every stage transition of a run
    fn on_progress(&self, event: ProgressEvent);
}

/// Logs every progress event through `tracing`
#[derive(Debug, Default)]
pub struct LoggingProgressTracker;

impl ProgressTracker for LoggingProgressTracker {
    #[instrument(skip_all)]
    fn on_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                batch_id,
                pipeline,
                attempt,
            } => {
                info!("🚀 Batch {batch_id} of '{pipeline}' started (attempt {attempt})");
            }
            ProgressEvent::SourceExtracted { name, records } => {
                info!("📥 Extracted {records} records from source: {name}");
            }
            ProgressEvent::Staged { records } => {
                info!("📚 Staged {records} records");
            }
            ProgressEvent::Transformed { records, failed } => {
                info!("⚙️  Transformed {records} records ({failed} failed)");
            }
            ProgressEvent::Validated { records, failed } => {
                info!("🔍 Validated {records} records ({failed} rejected)");
            }
            ProgressEvent::DestinationLoaded {
                name,
                successful,
                failed,
            } => {
                info!("📦 Loaded destination: {name} ({successful} written, {failed} failed)");
            }
            ProgressEvent::Aggregated { patterns } => {
                info!("🧹 Aggregates refreshed, {patterns} cache namespaces invalidated");
            }
            ProgressEvent::Completed { duration_ms } => {
                info!(
                    "🎉 Batch completed (total time: {:.2}s)",
                    duration_ms as f64 / 1000.0
                );
            }
            ProgressEvent::Failed { error, will_retry } => {
                warn!("❗ Batch failed (retry scheduled: {will_retry}): {error}");
            }
        }
    }
}
