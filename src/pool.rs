//! Bounded worker pool driving row tasks to completion
//!
//! `concurrency` workers pull rows from a shared queue. Each row runs in its
//! own spawned task so a panic is contained and still produces an outcome.
//! Outcomes flow over a channel to a single collector that owns the summary.

use crate::error::FetchError;
use crate::services::progress::{NoOpProgressReporter, ProgressReporter, RunProgress};
use crate::task::{RowTask, TaskContext};
use crate::tracing_config::spans;
use crate::types::{Outcome, OutcomeEvent, Row, RunSummary};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

type RowQueue = Arc<Mutex<VecDeque<Row>>>;

/// Runs up to `concurrency` row tasks at a time
pub struct WorkerPool {
    concurrency: usize,
    label: String,
    reporter: Arc<dyn ProgressReporter>,
}

impl WorkerPool {
    /// Create a pool; a concurrency of zero is treated as one
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            label: "images".to_string(),
            reporter: Arc::new(NoOpProgressReporter),
        }
    }

    /// Name shown by progress reporters for this run
    #[must_use]
    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every row and return once all of them are terminal
    pub async fn run(&self, ctx: Arc<TaskContext>, rows: Vec<Row>) -> RunSummary {
        let progress = Arc::new(RunProgress::new(rows.len()));
        self.run_with_progress(ctx, rows, progress).await
    }

    /// Like [`WorkerPool::run`], publishing completion counts through `progress`
    ///
    /// `progress` can be polled from another task while the run is in flight.
    pub async fn run_with_progress(
        &self,
        ctx: Arc<TaskContext>,
        rows: Vec<Row>,
        progress: Arc<RunProgress>,
    ) -> RunSummary {
        let started = Instant::now();
        let total = rows.len();
        let mut summary = RunSummary::new(total);
        self.reporter.report_start(&self.label, total);

        let worker_count = self.concurrency.min(total);
        tracing::debug!(total, workers = worker_count, "Starting worker pool");

        let queue: RowQueue = Arc::new(Mutex::new(rows.into()));
        let (tx, mut rx) = mpsc::channel::<OutcomeEvent>(worker_count.max(1) * 2);

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(worker_id, ctx.clone(), queue.clone(), tx.clone()));
        }
        drop(tx);

        while let Some(event) = rx.recv().await {
            self.collect(&mut summary, &progress, event);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker terminated abnormally");
            }
        }

        // Rows never taken because the run was cancelled
        let remaining: Vec<Row> = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if !remaining.is_empty() {
            tracing::info!(count = remaining.len(), "Run cancelled, marking untouched rows");
        }
        for row in remaining {
            let event = OutcomeEvent {
                row,
                outcome: Outcome::GaveUpAfterRetries {
                    attempts: 0,
                    last_failure: FetchError::Cancelled,
                },
            };
            self.collect(&mut summary, &progress, event);
        }

        summary.elapsed = started.elapsed();
        debug_assert_eq!(summary.completed(), total);
        self.reporter.report_completion(&summary);
        summary
    }

    fn collect(&self, summary: &mut RunSummary, progress: &RunProgress, event: OutcomeEvent) {
        summary.record(&event.row, &event.outcome);
        progress.record(&event.outcome);
        self.reporter.report_outcome(&event);
        self.reporter.report_progress(&progress.snapshot());
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<TaskContext>,
    queue: RowQueue,
    tx: mpsc::Sender<OutcomeEvent>,
) {
    loop {
        if ctx.cancel.is_cancelled() {
            tracing::debug!(worker_id, "Cancellation requested, worker stopping");
            break;
        }

        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some(row) = next else {
            break;
        };

        let outcome = run_isolated(ctx.clone(), row.clone()).await;
        if tx.send(OutcomeEvent { row, outcome }).await.is_err() {
            break;
        }
    }
}

/// Run one row in its own task, converting a panic into a failed outcome
async fn run_isolated(ctx: Arc<TaskContext>, row: Row) -> Outcome {
    let id = row.id().to_string();
    let span = spans::row_task(&id);
    let handle = tokio::spawn(async move { RowTask::new(ctx, row).run().await }.instrument(span));

    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(image_id = %id, error = %e, "Row task aborted");
            Outcome::GaveUpAfterRetries {
                attempts: 0,
                last_failure: FetchError::internal(format!("row task aborted: {}", e)),
            }
        },
    }
}
