use crate::{
    cancellation::StopToken,
    config::ConfigError,
    env::Environment,
    metrics::{ThroughputReporter, TrainingMetrics},
    model::ActorCriticModel,
    shared_store::SharedParameterStore,
    worker::{ActorLearner, WorkerSummary},
};
use anyhow::{Context, Result};
use crossbeam::channel::{self, RecvTimeoutError};
use log::{error, info, warn};
use std::{
    any::Any,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    /// Longest wait for a worker to report before the coordinator looks around again.
    pub join_poll_interval: Duration,
    /// How long workers get to finish their iteration after an interrupt.
    pub shutdown_timeout: Duration,
    pub report_interval: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            join_poll_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(60),
            report_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStatus {
    Finished(WorkerSummary),
    /// The worker returned an error or panicked.
    Failed(String),
    /// Still running when the shutdown timeout ran out, the thread was left behind.
    Detached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    pub status: WorkerStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub final_global_step: u64,
    pub interrupted: bool,
    pub workers: Vec<WorkerOutcome>,
}

impl TrainingReport {
    pub fn failures(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.workers
            .iter()
            .filter(|outcome| matches!(outcome.status, WorkerStatus::Failed(_)))
    }
}

/// Routes an interrupt into every worker's stop token. Cheap to clone, safe to move into a
/// signal handler.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    interrupted: StopToken,
    workers: Vec<StopToken>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.interrupted.raise();
        for token in &self.workers {
            token.raise();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_raised()
    }
}

/// Runs N actor-learners that share one parameter store until they all stop.
pub struct Coordinator<E: Environment, M: ActorCriticModel> {
    store: Arc<SharedParameterStore>,
    workers: Vec<ActorLearner<E, M>>,
    metrics: Arc<TrainingMetrics>,
    options: CoordinatorOptions,
    interrupt: InterruptHandle,
}

impl<E: Environment + 'static, M: ActorCriticModel + 'static> Coordinator<E, M> {
    pub fn new(
        store: Arc<SharedParameterStore>,
        workers: Vec<ActorLearner<E, M>>,
        metrics: Arc<TrainingMetrics>,
        options: CoordinatorOptions,
    ) -> Result<Self> {
        if workers.is_empty() {
            return Err(ConfigError::NoWorkers.into());
        }
        let interrupt = InterruptHandle {
            interrupted: StopToken::new(),
            workers: workers.iter().map(|worker| worker.stop_token()).collect(),
        };
        Ok(Self {
            store,
            workers,
            metrics,
            options,
            interrupt,
        })
    }

    pub fn stop_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn store(&self) -> &Arc<SharedParameterStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<TrainingMetrics> {
        &self.metrics
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Starts every worker on its own thread and waits for all of them.
    ///
    /// Worker failures are recorded in the report, they never stop the other workers. After an
    /// interrupt, workers that have not finished within the shutdown timeout are detached.
    pub fn run(self) -> Result<TrainingReport> {
        let Self {
            store,
            workers,
            metrics,
            options,
            interrupt,
        } = self;
        let num_workers = workers.len();
        info!(
            global_step = store.global_step();
            "starting {num_workers} actor-learners"
        );
        let (sender, receiver) = channel::unbounded();
        let mut worker_ids = Vec::with_capacity(num_workers);
        let mut handles: Vec<Option<JoinHandle<()>>> = Vec::with_capacity(num_workers);
        for (idx, worker) in workers.into_iter().enumerate() {
            worker_ids.push(worker.worker_id());
            let sender = sender.clone();
            let handle = thread::Builder::new()
                .name(format!("actor-learner-{}", worker.worker_id()))
                .spawn(move || {
                    let result = worker.run();
                    let _ = sender.send((idx, result));
                })
                .context("spawning actor-learner thread")?;
            handles.push(Some(handle));
        }
        drop(sender);

        let mut statuses: Vec<Option<WorkerStatus>> = vec![None; num_workers];

        let mut reporter = ThroughputReporter::start(store.global_step(), &metrics);
        let mut next_report = Instant::now() + options.report_interval;
        let mut shutdown_deadline: Option<Instant> = None;
        while statuses.iter().any(Option::is_none) {
            if interrupt.is_interrupted() && shutdown_deadline.is_none() {
                warn!("interrupt received, waiting for the actor-learners to finish their iteration");
                interrupt.interrupt();
                shutdown_deadline = Some(Instant::now() + options.shutdown_timeout);
            }
            let now = Instant::now();
            if let Some(deadline) = shutdown_deadline
                && now >= deadline
            {
                for (idx, status) in statuses.iter_mut().enumerate() {
                    if status.is_none() {
                        warn!(worker_id = worker_ids[idx]; "actor-learner did not stop in time, detaching it");
                        handles[idx] = None;
                        *status = Some(WorkerStatus::Detached);
                    }
                }
                break;
            }
            if now >= next_report {
                reporter.report(store.global_step(), &metrics);
                next_report = now + options.report_interval;
            }
            let mut timeout = options
                .join_poll_interval
                .min(next_report.saturating_duration_since(now));
            if let Some(deadline) = shutdown_deadline {
                timeout = timeout.min(deadline.saturating_duration_since(now));
            }
            match receiver.recv_timeout(timeout) {
                Ok((idx, result)) => {
                    statuses[idx] = Some(join_worker(&mut handles[idx], worker_ids[idx], result));
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    // results are sent before a thread ends, so anything finished before the
                    // drain without a result has panicked
                    let finished: Vec<bool> = handles
                        .iter()
                        .map(|handle| handle.as_ref().is_some_and(JoinHandle::is_finished))
                        .collect();
                    while let Ok((idx, result)) = receiver.try_recv() {
                        statuses[idx] =
                            Some(join_worker(&mut handles[idx], worker_ids[idx], result));
                    }
                    for (idx, finished) in finished.into_iter().enumerate() {
                        if finished && statuses[idx].is_none() {
                            statuses[idx] = Some(reap_panicked(&mut handles[idx], worker_ids[idx]));
                        }
                    }
                }
            }
        }

        let final_global_step = store.global_step();
        reporter.flush(final_global_step, &metrics);
        let workers = worker_ids
            .into_iter()
            .zip(statuses)
            .map(|(worker_id, status)| WorkerOutcome {
                worker_id,
                status: status.unwrap_or(WorkerStatus::Detached),
            })
            .collect();
        Ok(TrainingReport {
            final_global_step,
            interrupted: interrupt.is_interrupted(),
            workers,
        })
    }
}

fn join_worker(
    handle: &mut Option<JoinHandle<()>>,
    worker_id: usize,
    result: Result<WorkerSummary>,
) -> WorkerStatus {
    if let Some(handle) = handle.take() {
        let _ = handle.join();
    }
    match result {
        Ok(summary) => WorkerStatus::Finished(summary),
        Err(err) => {
            error!(worker_id = worker_id; "actor-learner failed: {err:#}");
            WorkerStatus::Failed(format!("{err:#}"))
        }
    }
}

fn reap_panicked(handle: &mut Option<JoinHandle<()>>, worker_id: usize) -> WorkerStatus {
    let message = match handle.take().map(JoinHandle::join) {
        Some(Err(payload)) => panic_message(payload.as_ref()),
        _ => "exited without a result".to_owned(),
    };
    error!(worker_id = worker_id; "actor-learner panicked: {message}");
    WorkerStatus::Failed(format!("panicked: {message}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
