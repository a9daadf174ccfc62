#![allow(dead_code)]

use a3c_core::{
    A3CConfig, ActorCriticModel, ActorLearner, Environment, EnvironmentDescription,
    ObservationShape, ParameterSchema, ParameterSpec, ParameterVector, SharedParameterStore,
    cancellation::StopToken,
    optimizer::{LearningRate, OptimizerKind, Sgd},
};
use anyhow::{Result, bail};
use candle_core::{D, DType, Device, Tensor};
use std::sync::Arc;

pub const WIDTH: usize = 3;
pub const HEIGHT: usize = 2;
pub const CHANNELS: usize = 2;
pub const ACTIONS: usize = 4;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Single linear layer for both heads, enough to produce real gradients.
pub struct LinearActorCritic {
    schema: ParameterSchema,
    shape: ObservationShape,
    num_actions: usize,
    value_bias: f32,
}

impl LinearActorCritic {
    pub fn new(shape: ObservationShape, num_actions: usize) -> Self {
        let input = shape.size();
        let schema = ParameterSchema::new(vec![
            ParameterSpec::new("policy_weight", (num_actions, input), DType::F32),
            ParameterSpec::new("policy_bias", num_actions, DType::F32),
            ParameterSpec::new("value_weight", (1, input), DType::F32),
            ParameterSpec::new("value_bias", 1, DType::F32),
        ]);
        Self {
            schema,
            shape,
            num_actions,
            value_bias: 0.,
        }
    }

    /// Initial value head bias, makes bootstrapped values easy to recognise.
    pub fn with_value_bias(mut self, value_bias: f32) -> Self {
        self.value_bias = value_bias;
        self
    }
}

impl ActorCriticModel for LinearActorCritic {
    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn observation_shape(&self) -> ObservationShape {
        self.shape
    }

    fn num_actions(&self) -> usize {
        self.num_actions
    }

    fn initial_parameters(&self, device: &Device) -> Result<ParameterVector> {
        let input = self.shape.size();
        Ok(ParameterVector::new(vec![
            Tensor::randn(0f32, 0.1, (self.num_actions, input), device)?,
            Tensor::zeros(self.num_actions, DType::F32, device)?,
            Tensor::zeros((1, input), DType::F32, device)?,
            Tensor::new(&[self.value_bias], device)?,
        ]))
    }

    fn pi_and_value(&self, params: &[Tensor], observations: &Tensor) -> Result<(Tensor, Tensor)> {
        let xs = observations.flatten_from(1)?;
        let logits = xs.matmul(&params[0].t()?)?.broadcast_add(&params[1])?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let values = xs.matmul(&params[2].t()?)?.broadcast_add(&params[3])?;
        Ok((probs, values))
    }
}

/// What a scripted environment does once it has been acted on `n` times.
#[derive(Debug, Clone)]
pub enum Script {
    /// Never terminates.
    Endless,
    /// Terminal after this many actions since the last reset, warm up included.
    TerminateAfter(usize),
    /// Returns an error from this action on.
    FailAfter(usize),
    /// Panics on this action.
    PanicAfter(usize),
}

/// Deterministic environment: every frame is filled with the action counter, every action
/// yields the same reward.
pub struct ScriptedEnv {
    script: Script,
    reward: f32,
    acts: usize,
    total_acts: usize,
    raise_on_act: Option<(usize, StopToken)>,
    frame_width: usize,
    frame_height: usize,
    actions: Vec<usize>,
}

impl ScriptedEnv {
    pub fn new(script: Script, reward: f32) -> Self {
        Self {
            script,
            reward,
            acts: 0,
            total_acts: 0,
            raise_on_act: None,
            frame_width: WIDTH,
            frame_height: HEIGHT,
            actions: (0..ACTIONS).collect(),
        }
    }

    pub fn with_frame_size(mut self, width: usize, height: usize) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    pub fn with_actions(mut self, actions: Vec<usize>) -> Self {
        self.actions = actions;
        self
    }

    /// Raises `token` when the environment is acted on for the `act`-th time overall.
    pub fn raising_on_act(mut self, act: usize, token: StopToken) -> Self {
        self.raise_on_act = Some((act, token));
        self
    }
}

impl Environment for ScriptedEnv {
    fn reset(&mut self) -> Result<()> {
        self.acts = 0;
        Ok(())
    }

    fn act(&mut self, action: usize) -> Result<(f32, Tensor)> {
        assert!(self.actions.contains(&action), "unknown action {action}");
        self.acts += 1;
        self.total_acts += 1;
        if let Some((act, token)) = &self.raise_on_act
            && *act == self.total_acts
        {
            token.raise();
        }
        match self.script {
            Script::FailAfter(n) if self.acts > n => bail!("environment broke down"),
            Script::PanicAfter(n) if self.acts > n => panic!("environment exploded"),
            _ => {}
        }
        let frame = Tensor::full(
            self.acts as f32 / 100.,
            (self.frame_height, self.frame_width),
            &Device::Cpu,
        )?;
        Ok((self.reward, frame))
    }

    fn is_terminal(&self) -> bool {
        matches!(self.script, Script::TerminateAfter(n) if self.acts >= n)
    }

    fn available_actions(&self) -> Vec<usize> {
        self.actions.clone()
    }

    fn description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(self.frame_width, self.frame_height, self.actions.len())
    }
}

pub fn model() -> Arc<LinearActorCritic> {
    Arc::new(LinearActorCritic::new(
        ObservationShape::new(WIDTH, HEIGHT, CHANNELS),
        ACTIONS,
    ))
}

pub fn store_for(
    model: &LinearActorCritic,
    learning_rate: f64,
) -> Result<Arc<SharedParameterStore>> {
    let device = Device::Cpu;
    let optimizer = OptimizerKind::from(Sgd {
        learning_rate: LearningRate::constant(learning_rate),
    });
    Ok(Arc::new(SharedParameterStore::new(
        model.schema().clone(),
        model.initial_parameters(&device)?,
        optimizer,
    )?))
}

pub fn config(max_global_step: u64) -> A3CConfig {
    A3CConfig {
        skip_num: 1,
        max_global_step,
        seed: Some(11),
        ..Default::default()
    }
}

pub fn worker(
    worker_id: usize,
    env: ScriptedEnv,
    model: Arc<LinearActorCritic>,
    store: Arc<SharedParameterStore>,
    config: A3CConfig,
) -> Result<ActorLearner<ScriptedEnv, LinearActorCritic>> {
    ActorLearner::new(worker_id, env, model, store, config, &Device::Cpu)
}
