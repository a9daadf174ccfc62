use crate::{
    accumulator::GradientAccumulator,
    cancellation::StopToken,
    config::A3CConfig,
    env::Environment,
    frame_stack::FrameStack,
    hooks::{IterationHook, WorkerView},
    loss::{LossWeights, actor_critic_losses},
    metrics::TrainingMetrics,
    model::ActorCriticModel,
    rng::stream_rng,
    rollout::{act_with_skip, action_probabilities, sample_action, state_value, warm_up},
    shared_store::SharedParameterStore,
    utils::trajectory::Trajectory,
};
use anyhow::{Result, ensure};
use candle_core::{Device, Tensor, Var};
use derive_more::Display;
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use std::sync::Arc;

/// Phases of one actor-learner iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WorkerState {
    Syncing,
    RollingOut,
    Bootstrapping,
    ReturnCompute,
    Accumulating,
    Applying,
    Stopped,
}

/// What a worker did until it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub iterations: usize,
    /// Local step counter, one per recorded environment step.
    pub local_steps: usize,
    pub applies: u64,
    pub episodes: u64,
    /// Global step returned by the last apply of this worker.
    pub last_global_step: u64,
}

/// Outcome of a single iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    pub t_start: usize,
    pub length: usize,
    pub terminal: bool,
    pub bootstrap: f32,
    /// `None` when the segment was empty and nothing was applied.
    pub global_step: Option<u64>,
}

/// One asynchronous actor-learner.
///
/// Owns a local replica of the shared parameters and its own gradient accumulator. Every
/// iteration syncs the replica, plays a segment of at most `t_max` steps with it, and pushes the
/// clipped gradients of the segment into the shared store.
pub struct ActorLearner<E: Environment, M: ActorCriticModel> {
    worker_id: usize,
    env: E,
    model: Arc<M>,
    local_params: Vec<Var>,
    accumulator: GradientAccumulator,
    store: Arc<SharedParameterStore>,
    config: A3CConfig,
    stop: StopToken,
    hook: Option<Box<dyn IterationHook>>,
    view: WorkerView,
    metrics: Arc<TrainingMetrics>,
    rng: StdRng,
    device: Device,
    available_actions: Vec<usize>,
    state: WorkerState,
    t: usize,
    summary: WorkerSummary,
}

impl<E: Environment, M: ActorCriticModel> ActorLearner<E, M> {
    /// Checks that environment, model, store and hyperparameters agree. Nothing is started here.
    pub fn new(
        worker_id: usize,
        env: E,
        model: Arc<M>,
        store: Arc<SharedParameterStore>,
        config: A3CConfig,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let available_actions = env.available_actions();
        let observation_shape = model.observation_shape();
        ensure!(
            observation_shape.num_channels > 0,
            "observations need at least one channel"
        );
        env.description().check_compatible(
            &available_actions,
            &observation_shape,
            model.num_actions(),
        )?;
        ensure!(
            model.schema() == store.schema(),
            "the shared store was built for a different parameter schema than the model's"
        );
        let local_params = store.snapshot().to_vars()?;
        let accumulator = GradientAccumulator::new(store.schema().clone(), device)?;
        let view = WorkerView::new(worker_id, store.clone());
        Ok(Self {
            worker_id,
            env,
            model,
            local_params,
            accumulator,
            store,
            rng: stream_rng(config.seed, worker_id as u64),
            config,
            stop: StopToken::new(),
            hook: None,
            view,
            metrics: Arc::new(TrainingMetrics::new()),
            device: device.clone(),
            available_actions,
            state: WorkerState::Syncing,
            t: 0,
            summary: WorkerSummary {
                worker_id,
                ..Default::default()
            },
        })
    }

    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<TrainingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_view(mut self, view: WorkerView) -> Self {
        self.view = view;
        self
    }

    pub fn set_hook(&mut self, hook: Box<dyn IterationHook>) {
        self.hook = Some(hook);
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn summary(&self) -> &WorkerSummary {
        &self.summary
    }

    /// The local replica as plain tensors.
    pub fn local_parameters(&self) -> Vec<Tensor> {
        self.local_params
            .iter()
            .map(|var| var.as_tensor().clone())
            .collect()
    }

    pub fn accumulator(&self) -> &GradientAccumulator {
        &self.accumulator
    }

    fn transition(&mut self, state: WorkerState) {
        trace!(worker_id = self.worker_id; "{} -> {}", self.state, state);
        self.state = state;
    }

    fn should_stop(&self) -> bool {
        self.stop.is_raised() || self.store.global_step() >= self.config.max_global_step
    }

    /// Copies the shared parameters into the local replica.
    pub fn sync(&mut self) -> Result<()> {
        self.transition(WorkerState::Syncing);
        let snapshot = self.store.snapshot();
        for (var, tensor) in self.local_params.iter().zip(snapshot.iter()) {
            var.set(tensor)?;
        }
        Ok(())
    }

    fn initial_frames(&mut self) -> Result<FrameStack> {
        self.env.reset()?;
        warm_up(
            &mut self.env,
            self.model.observation_shape().num_channels,
            self.config.skip_num,
            &mut self.rng,
        )
    }

    /// Resets the environment and plays until it terminates or `t_max` steps are recorded.
    pub fn rollout(&mut self) -> Result<Trajectory> {
        self.transition(WorkerState::RollingOut);
        let mut frames = self.initial_frames()?;
        let params = self.local_parameters();
        let mut trajectory = Trajectory::default();
        let t_start = self.t;
        while !self.env.is_terminal() && self.t - t_start < self.config.t_max {
            let state = frames.observation()?;
            let probs = action_probabilities(&*self.model, &params, &state)?;
            let index = sample_action(&probs, &self.available_actions, &mut self.rng)?;
            let step = act_with_skip(
                &mut self.env,
                self.available_actions[index],
                self.config.skip_num,
                self.config.reward_clipping,
            )?;
            trajectory.push_step(state, index, step.reward);
            trajectory.raw_reward += step.raw_reward;
            frames.push(step.frame);
            self.t += 1;
        }
        let played = (self.t - t_start + frames.num_channels()) * self.config.skip_num;
        self.metrics.record_frames(played as u64);
        if self.env.is_terminal() {
            self.metrics.record_episode(trajectory.raw_reward);
            self.summary.episodes += 1;
        } else {
            trajectory.last_observation = Some(frames.observation()?);
        }
        Ok(trajectory)
    }

    /// Zero for terminated segments, the local value estimate of the last observation otherwise.
    pub fn bootstrap(&mut self, trajectory: &Trajectory) -> Result<f32> {
        self.transition(WorkerState::Bootstrapping);
        match &trajectory.last_observation {
            None => Ok(0.),
            Some(observation) => {
                state_value(&*self.model, &self.local_parameters(), observation)
            }
        }
    }

    /// Resets the accumulator and adds the gradients of the segment loss w.r.t. the local replica.
    pub fn accumulate(&mut self, trajectory: Trajectory, bootstrap: f32) -> Result<()> {
        self.transition(WorkerState::ReturnCompute);
        self.accumulator.reset()?;
        let batch = trajectory.into_batch(
            bootstrap,
            self.config.gamma,
            self.model.num_actions(),
            &self.device,
        )?;
        self.transition(WorkerState::Accumulating);
        let params = self.local_parameters();
        let (probs, values) = self.model.pi_and_value(&params, &batch.states)?;
        let losses = actor_critic_losses(&probs, &values, &batch, LossWeights::from(&self.config))?;
        let grad_store = losses.total.backward()?;
        let grads = self
            .local_params
            .iter()
            .map(|var| match grad_store.get(var.as_tensor()) {
                Some(grad) => Ok(grad.clone()),
                None => var.zeros_like(),
            })
            .collect::<candle_core::Result<Vec<Tensor>>>()?;
        self.accumulator.accumulate(&grads)
    }

    /// Clips the accumulated gradients and applies them to the shared store.
    pub fn apply(&mut self) -> Result<u64> {
        self.transition(WorkerState::Applying);
        let global_step = self
            .store
            .apply_clipped(self.accumulator.gradients(), self.config.grad_clip)?;
        self.summary.applies += 1;
        self.summary.last_global_step = global_step;
        self.metrics.record_segment();
        Ok(global_step)
    }

    /// One full sync, rollout, accumulate, apply cycle. Stop requests are not looked at.
    pub fn run_iteration(&mut self) -> Result<SegmentStats> {
        self.sync()?;
        let t_start = self.t;
        let trajectory = self.rollout()?;
        let length = trajectory.len();
        let terminal = trajectory.terminated();
        if trajectory.is_empty() {
            warn!(
                worker_id = self.worker_id;
                "environment terminated during warm up, skipping the empty segment"
            );
            return Ok(SegmentStats {
                t_start,
                length,
                terminal,
                bootstrap: 0.,
                global_step: None,
            });
        }
        let bootstrap = self.bootstrap(&trajectory)?;
        self.accumulate(trajectory, bootstrap)?;
        let global_step = self.apply()?;
        debug!(
            worker_id = self.worker_id, global_step = global_step;
            "segment t_start: {t_start}, t: {}, length: {length}, terminal: {terminal}",
            self.t
        );
        Ok(SegmentStats {
            t_start,
            length,
            terminal,
            bootstrap,
            global_step: Some(global_step),
        })
    }

    /// Iterates until the global step reaches its maximum or the stop token is raised. Both are
    /// only checked between iterations.
    pub fn run(mut self) -> Result<WorkerSummary> {
        info!(worker_id = self.worker_id; "actor-learner started");
        while !self.should_stop() {
            self.run_iteration()?;
            self.summary.iterations += 1;
            self.summary.local_steps = self.t;
            let iteration = self.summary.iterations;
            if let Some(hook) = self.hook.as_mut()
                && hook.call_hook(&self.view, &iteration)?
            {
                info!(worker_id = self.worker_id; "iteration hook requested a stop");
                self.stop.raise();
            }
        }
        self.transition(WorkerState::Stopped);
        info!(
            worker_id = self.worker_id, global_step = self.store.global_step();
            "actor-learner stopped after {} iterations",
            self.summary.iterations
        );
        Ok(self.summary)
    }
}
