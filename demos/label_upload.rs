//! Simulated label-photo upload session.
//!
//! Enqueues a batch of fake photos against a flaky uploader, backgrounds the
//! "app" halfway through, then brings it back and retries whatever failed.
//!
//! ```text
//! RUST_LOG=uploadq=debug cargo run --example label_upload
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;
use uploadq::{LifecycleSignal, Payload, QueueConfig, TaskQueue, UploadError, UploadOutcome};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = QueueConfig::from_json(r#"{ "max_concurrency": 2, "base_delay_ms": 200 }"#)?;

    // Every third request times out; the store with id 13 always rejects.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let queue = TaskQueue::new(config, move |payload: Payload| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            if payload.get("store_id") == Some("13") {
                UploadOutcome::Failure(UploadError::permanent("store closed"))
            } else if n % 3 == 2 {
                UploadOutcome::Failure(UploadError::new("request timed out"))
            } else {
                UploadOutcome::Success
            }
        }
    })?;

    let app = LifecycleSignal::new();
    let _subscription = queue.attach_lifecycle(&app);

    for i in 0..8 {
        let store = if i == 5 { "13" } else { "7" };
        queue.enqueue(
            Payload::new(vec![0u8; 64 * 1024])
                .with("item_id", format!("sku-{i}"))
                .with("store_id", store),
        );
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    app.suspended();
    info!(progress = %queue.progress(), "app backgrounded");

    tokio::time::sleep(Duration::from_secs(1)).await;
    app.resumed();
    info!(progress = %queue.progress(), "app foregrounded");

    let mut progress = queue.subscribe();
    progress.wait_for(|p| p.is_idle()).await?;
    info!(progress = %queue.progress(), "first pass finished");

    if queue.progress().has_failures() {
        queue.retry_failed_uploads();
        progress.wait_for(|p| p.is_idle()).await?;
    }

    for task in queue.snapshot() {
        info!(
            task = %task.id(),
            item = task.payload().get("item_id").unwrap_or("?"),
            status = %task.status(),
            retries = task.retry_count(),
            error = task.last_error().unwrap_or(""),
            "final state"
        );
    }
    println!("{}", serde_json::to_string_pretty(&queue.progress())?);

    queue.remove_completed();
    info!(remaining = queue.snapshot().len(), "completed uploads removed");
    Ok(())
}
