use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::definition::RecurrenceDefinition;
use crate::engine::executor::{generate, GenerateError, GenerationOutcome};
use crate::engine::selector::select_due;
use crate::store::{RecurrenceStore, StoreError};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_period: Duration,
    /// Upper bound on definitions processed in parallel within one tick.
    /// 1 means strictly sequential.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(60),
            workers: 4,
        }
    }
}

/// Outcome counts for one tick, reported to the ops layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub as_of: DateTime<Utc>,
    pub generated: usize,
    pub already_generated: usize,
    pub ended: usize,
    pub transient_errors: usize,
    pub permanent_errors: usize,
    pub invariant_violations: usize,
    /// Definitions newly flagged Failing this tick, for alerting.
    pub newly_failing: Vec<String>,
}

impl TickReport {
    fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            generated: 0,
            already_generated: 0,
            ended: 0,
            transient_errors: 0,
            permanent_errors: 0,
            invariant_violations: 0,
            newly_failing: Vec::new(),
        }
    }

    pub fn processed(&self) -> usize {
        self.generated
            + self.already_generated
            + self.ended
            + self.transient_errors
            + self.permanent_errors
            + self.invariant_violations
    }
}

/// Signals the scheduler loop to stop after the in-flight tick completes.
/// Generation transactions are never cancelled midway. Dropping the last
/// handle also stops the loop, so callers must hold it while running.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// The process-wide driver: wakes on a fixed period, selects the due set
/// with a single `as_of` captured per tick, dispatches each definition to
/// the executor, and aggregates outcomes. One definition's failure never
/// aborts the tick for the others.
pub struct Scheduler<S> {
    store: Arc<S>,
    config: SchedulerConfig,
    shutdown_rx: Receiver<()>,
}

impl<S: RecurrenceStore> Scheduler<S> {
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> (Self, ShutdownHandle) {
        let (tx, rx) = bounded(1);
        (
            Self {
                store,
                config,
                shutdown_rx: rx,
            },
            ShutdownHandle { tx },
        )
    }

    /// Run one tick against a fixed instant.
    pub fn tick(&self, as_of: DateTime<Utc>) -> Result<TickReport, StoreError> {
        let due = select_due(self.store.as_ref(), as_of)?;
        let mut report = TickReport::new(as_of);
        if due.is_empty() {
            return Ok(report);
        }
        debug!(due = due.len(), %as_of, "processing due definitions");

        let results = if self.config.workers > 1 && due.len() > 1 {
            self.process_parallel(due, as_of)
        } else {
            due.into_iter()
                .map(|definition| {
                    let outcome = generate(self.store.as_ref(), &definition, as_of);
                    (definition.id, outcome)
                })
                .collect()
        };

        for (id, result) in results {
            record(&mut report, id, result);
        }
        report.newly_failing.sort();
        Ok(report)
    }

    /// Fan the due set out over a bounded pool of worker threads. Order
    /// between definitions carries no guarantee; per-definition occurrence
    /// order is enforced by the log, not by scheduling.
    fn process_parallel(
        &self,
        due: Vec<RecurrenceDefinition>,
        as_of: DateTime<Utc>,
    ) -> Vec<(String, Result<GenerationOutcome, GenerateError>)> {
        let workers = self.config.workers.min(due.len());
        let (job_tx, job_rx) = bounded::<RecurrenceDefinition>(due.len());
        let (out_tx, out_rx) = bounded(due.len());
        for definition in due {
            let _ = job_tx.send(definition);
        }
        drop(job_tx);

        let store = self.store.as_ref();
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move || {
                    while let Ok(definition) = job_rx.recv() {
                        let outcome = generate(store, &definition, as_of);
                        let _ = out_tx.send((definition.id, outcome));
                    }
                });
            }
        });
        drop(out_tx);

        out_rx.iter().collect()
    }

    /// Tick on a fixed period until shut down (or until `max_ticks`
    /// completes, when given). Returns the number of completed ticks.
    pub fn run(&self, max_ticks: Option<u64>) -> u64 {
        let ticker = crossbeam_channel::tick(self.config.tick_period);
        let mut completed = 0;
        info!(period = ?self.config.tick_period, workers = self.config.workers, "scheduler started");
        loop {
            crossbeam_channel::select! {
                recv(self.shutdown_rx) -> _ => {
                    info!("shutdown requested, stopping scheduler");
                    break;
                }
                recv(ticker) -> _ => {
                    let as_of = Utc::now();
                    match self.tick(as_of) {
                        Ok(report) => {
                            info!(
                                generated = report.generated,
                                already_generated = report.already_generated,
                                ended = report.ended,
                                transient = report.transient_errors,
                                permanent = report.permanent_errors,
                                "tick complete"
                            );
                        }
                        // Selection failed; every occurrence stays due.
                        Err(err) => warn!(error = %err, "tick skipped, will retry"),
                    }
                    completed += 1;
                    if max_ticks.is_some_and(|max| completed >= max) {
                        break;
                    }
                }
            }
        }
        completed
    }
}

fn record(
    report: &mut TickReport,
    id: String,
    result: Result<GenerationOutcome, GenerateError>,
) {
    match result {
        Ok(GenerationOutcome::Generated(invoice)) => {
            report.generated += 1;
            info!(definition = %id, invoice = %invoice, "invoice generated");
        }
        Ok(GenerationOutcome::AlreadyGenerated(invoice)) => {
            report.already_generated += 1;
            debug!(definition = %id, invoice = %invoice, "occurrence already generated");
        }
        Ok(GenerationOutcome::Ended) => {
            report.ended += 1;
            info!(definition = %id, "series ended");
        }
        Err(GenerateError::Transient(err)) => {
            report.transient_errors += 1;
            warn!(definition = %id, error = %err, "transient failure, occurrence stays due");
        }
        Err(GenerateError::Permanent(reason)) => {
            report.permanent_errors += 1;
            error!(definition = %id, %reason, "permanent failure, definition marked failing");
            report.newly_failing.push(id);
        }
        Err(GenerateError::InvariantViolation(detail)) => {
            report.invariant_violations += 1;
            error!(definition = %id, %detail, "INVARIANT VIOLATION");
        }
    }
}
