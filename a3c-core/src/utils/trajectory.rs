use crate::utils::returns::discounted_returns;
use candle_core::{Device, Result, Tensor};

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub state: Tensor,
    /// Index of the sampled policy output.
    pub action: usize,
    pub reward: f32,
}

/// The steps of one rollout segment, in the order they were played.
#[derive(Debug, Default)]
pub struct Trajectory {
    pub steps: Vec<StepRecord>,
    /// The observation after the last step, `None` when the environment terminated.
    pub last_observation: Option<Tensor>,
    /// Sum of the unclipped rewards, used for reporting only.
    pub raw_reward: f32,
}

impl Trajectory {
    pub fn push_step(&mut self, state: Tensor, action: usize, reward: f32) {
        self.steps.push(StepRecord {
            state,
            action,
            reward,
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn terminated(&self) -> bool {
        self.last_observation.is_none()
    }

    pub fn rewards(&self) -> Vec<f32> {
        self.steps.iter().map(|step| step.reward).collect()
    }

    /// Builds the training batch, seeding the return recursion with `bootstrap`.
    pub fn into_batch(
        self,
        bootstrap: f32,
        gamma: f32,
        num_actions: usize,
        device: &Device,
    ) -> Result<TrainingBatch> {
        let returns = discounted_returns(&self.rewards(), bootstrap, gamma);
        TrainingBatch::new(self.steps, returns, num_actions, device)
    }
}

/// Parallel batches of states, one hot actions and returns. Index `i` of every tensor belongs to
/// the same step.
#[derive(Debug)]
pub struct TrainingBatch {
    /// `[batch, channels, height, width]`
    pub states: Tensor,
    /// `[batch, actions]`
    pub actions: Tensor,
    /// `[batch, 1]`
    pub returns: Tensor,
}

impl TrainingBatch {
    pub fn new(
        steps: Vec<StepRecord>,
        returns: Vec<f32>,
        num_actions: usize,
        device: &Device,
    ) -> Result<Self> {
        let batch_size = steps.len();
        let states: Vec<&Tensor> = steps.iter().map(|step| &step.state).collect();
        let states = Tensor::stack(&states, 0)?;
        let mut one_hot = vec![0f32; batch_size * num_actions];
        for (idx, step) in steps.iter().enumerate() {
            one_hot[idx * num_actions + step.action] = 1.;
        }
        let actions = Tensor::from_vec(one_hot, (batch_size, num_actions), device)?;
        let returns = Tensor::from_vec(returns, (batch_size, 1), device)?;
        Ok(Self {
            states,
            actions,
            returns,
        })
    }

    pub fn len(&self) -> usize {
        self.returns.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
