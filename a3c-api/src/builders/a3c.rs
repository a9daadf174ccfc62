use crate::{
    builders::{network::NetworkBuilder, optimizer::OptimizerBuilder},
    hooks::periodic_evaluation::PeriodicEvaluationHook,
};
use a3c_candle::NetworkKind;
use a3c_core::{
    A3CConfig, ActorCriticModel, ActorLearner, ConfigError, Coordinator, CoordinatorOptions,
    Environment, SharedParameterStore,
    evaluation::{EpisodeEvaluator, PolicyEvaluator},
    hooks::{IntoIterationHook, WorkerView},
    metrics::TrainingMetrics,
    persistence::{ParameterSaver, SafetensorsCheckpoint},
};
use anyhow::Result;
use candle_core::Device;
use log::info;
use std::{path::PathBuf, sync::Arc};

/// Environment streams of test episodes start here, so they never share a stream with a worker.
pub const EVALUATION_STREAM: usize = 1 << 16;

/// Test runs and checkpoints done by worker 0 between iterations.
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    /// In iterations of worker 0.
    pub interval: usize,
    pub episodes: usize,
    pub max_episode_steps: usize,
    /// Checkpoints go to `<checkpoint_path>-<global step>.safetensors`.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            interval: 2000,
            episodes: 10,
            max_episode_steps: 10_000,
            checkpoint_path: None,
        }
    }
}

impl EvaluationSettings {
    pub fn hook(&self) -> PeriodicEvaluationHook {
        let hook = PeriodicEvaluationHook::new(self.interval, self.episodes);
        match &self.checkpoint_path {
            Some(path) => hook.with_checkpoint_path(path),
            None => hook,
        }
    }
}

pub struct A3CBuilder {
    pub config: A3CConfig,
    pub num_workers: usize,
    pub network: NetworkBuilder,
    pub optimizer: OptimizerBuilder,
    pub coordinator: CoordinatorOptions,
    pub evaluation: Option<EvaluationSettings>,
    /// Checkpoint file the shared parameters and the global step are restored from.
    pub resume_from: Option<PathBuf>,
}

impl Default for A3CBuilder {
    fn default() -> Self {
        Self {
            config: A3CConfig::default(),
            num_workers: 8,
            network: NetworkBuilder::default(),
            optimizer: OptimizerBuilder::default(),
            coordinator: CoordinatorOptions::default(),
            evaluation: None,
            resume_from: None,
        }
    }
}

impl A3CBuilder {
    /// Builds the shared store and every actor-learner. `env_factory` gets the worker id, test
    /// episodes get ids from [`EVALUATION_STREAM`] on.
    ///
    /// All configuration checks happen here, no thread is started before
    /// [`Coordinator::run`].
    pub fn build<E, F>(
        &self,
        env_factory: F,
        device: &Device,
    ) -> Result<Coordinator<E, NetworkKind>>
    where
        E: Environment + 'static,
        F: Fn(usize) -> Result<E> + Send + Sync + 'static,
    {
        if self.num_workers == 0 {
            return Err(ConfigError::NoWorkers.into());
        }
        self.config.validate()?;
        if self.network.observation_shape().num_channels == 0 {
            return Err(ConfigError::InvalidHyperparameter {
                name: "num_channels",
                reason: "observations need at least one frame".to_owned(),
            }
            .into());
        }
        let model = Arc::new(self.network.build()?);
        let schema = model.schema().clone();
        let (params, global_step) = match &self.resume_from {
            Some(file) => {
                let (params, global_step) = SafetensorsCheckpoint::load(&schema, file, device)?;
                info!(global_step = global_step; "resuming from {}", file.display());
                (params, global_step)
            }
            None => (model.initial_parameters(device)?, 0),
        };
        let optimizer = self.optimizer.build(&schema, device)?;
        let store = Arc::new(SharedParameterStore::from_parameters(
            schema.clone(),
            params,
            optimizer,
            global_step,
        )?);
        let metrics = Arc::new(TrainingMetrics::new());

        let env_factory = Arc::new(env_factory);
        let saver: Arc<dyn ParameterSaver> = Arc::new(SafetensorsCheckpoint::new(schema));
        let evaluator = self.evaluation.as_ref().map(|settings| {
            let factory = env_factory.clone();
            let evaluator = EpisodeEvaluator::new(
                move |episode| (*factory)(EVALUATION_STREAM + episode),
                model.clone(),
                self.config.skip_num,
                settings.max_episode_steps,
            )
            .with_seed(self.config.seed);
            Arc::new(evaluator) as Arc<dyn PolicyEvaluator>
        });

        let mut workers = Vec::with_capacity(self.num_workers);
        for worker_id in 0..self.num_workers {
            let env = (*env_factory)(worker_id)?;
            let mut view = WorkerView::new(worker_id, store.clone()).with_saver(saver.clone());
            if let Some(evaluator) = &evaluator {
                view = view.with_evaluator(evaluator.clone());
            }
            let mut worker = ActorLearner::new(
                worker_id,
                env,
                model.clone(),
                store.clone(),
                self.config.clone(),
                device,
            )?
            .with_metrics(metrics.clone())
            .with_view(view);
            if worker_id == 0
                && let Some(settings) = &self.evaluation
            {
                worker.set_hook(settings.hook().into_boxed());
            }
            workers.push(worker);
        }
        info!(
            workers = self.num_workers,
            parameters = model.schema().len(),
            global_step = global_step;
            "built a3c training"
        );
        Coordinator::new(store, workers, metrics, self.coordinator)
    }
}
