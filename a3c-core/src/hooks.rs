use crate::{
    evaluation::{EvaluationReport, PolicyEvaluator},
    persistence::ParameterSaver,
    shared_store::SharedParameterStore,
};
use a3c_macros::iteration_hook;
use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Called by a worker after every finished iteration with the iteration counter, starting at 1.
///
/// Returning `true` asks the worker to stop. The request is honoured at the next iteration
/// boundary like any other stop request.
#[iteration_hook]
pub trait IterationHook: Send {
    fn call_hook(&mut self, worker: &WorkerView, iteration: &usize) -> anyhow::Result<bool>;
}

/// What a hook may see and do from inside a worker.
#[derive(Clone)]
pub struct WorkerView {
    worker_id: usize,
    store: Arc<SharedParameterStore>,
    saver: Option<Arc<dyn ParameterSaver>>,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
}

impl WorkerView {
    pub fn new(worker_id: usize, store: Arc<SharedParameterStore>) -> Self {
        Self {
            worker_id,
            store,
            saver: None,
            evaluator: None,
        }
    }

    pub fn with_saver(mut self, saver: Arc<dyn ParameterSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn global_step(&self) -> u64 {
        self.store.global_step()
    }

    /// Saves the current shared parameters under the current global step.
    pub fn save_parameters(&self, path: &Path) -> Result<PathBuf> {
        let saver = self
            .saver
            .as_ref()
            .context("worker has no parameter saver")?;
        let global_step = self.store.global_step();
        saver.save(&self.store.snapshot(), path, global_step)
    }

    /// Evaluates the current shared parameters.
    pub fn evaluate(&self, episodes: usize) -> Result<EvaluationReport> {
        let evaluator = self
            .evaluator
            .as_ref()
            .context("worker has no policy evaluator")?;
        evaluator.evaluate(&self.store.snapshot(), episodes)
    }
}
