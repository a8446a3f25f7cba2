// core/src/consumer.rs

use crate::store::BatchSink;
use crate::types::Batch;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Counters returned when a consumer loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// batches written successfully
    pub persisted: u64,
    /// batches whose write failed and were dropped
    pub failed: u64,
    /// records contained in persisted batches
    pub records_written: u64,
    /// batches still queued when the loop was cancelled
    pub discarded: u64,
}

/// Drains `rx` into `sink` one batch at a time until the queue closes or `ct` fires.
///
/// A failed write is logged with the batch and dropped; it is never retried
/// and never stops the loop. Cancellation is only observed between batches,
/// so an in-flight write always completes.
pub async fn run_consumer(
    stream: String,
    mut rx: Receiver<Batch>,
    sink: Arc<dyn BatchSink>,
    ct: CancellationToken,
    periodic_log_every: u64,
) -> ConsumerReport {
    let destination = sink.destination();
    let mut report = ConsumerReport::default();

    loop {
        let batch = tokio::select! {
            biased;
            _ = ct.cancelled() => break,
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => break,
            },
        };

        match sink.insert_many(&batch).await {
            Ok(()) => {
                report.persisted += 1;
                report.records_written += batch.len() as u64;
            }
            Err(e) => {
                report.failed += 1;
                error!(
                    stream = %stream,
                    destination = %destination,
                    error = ?e,
                    "failed to insert: {}",
                    batch
                );
            }
        }

        let seen = report.persisted + report.failed;
        if periodic_log_every > 0 && seen % periodic_log_every == 0 {
            info!(
                stream = %stream,
                "consumer '{}' handled {} batches ({} failed)",
                destination,
                seen,
                report.failed
            );
        }
    }

    rx.close();
    while rx.try_recv().is_ok() {
        report.discarded += 1;
    }

    info!(
        stream = %stream,
        persisted = report.persisted,
        failed = report.failed,
        discarded = report.discarded,
        "consumer '{}' exiting",
        destination
    );
    report
}
