use crate::{
    config::RewardClipping,
    env::Environment,
    model::ActorCriticModel,
    parameters::ParameterVector,
    rng::stream_rng,
    rollout::{act_with_skip, action_probabilities, sample_action, warm_up},
};
use anyhow::{Result, ensure};
use derive_more::Display;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Aggregate episodic rewards of one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Display)]
#[display("{episodes} episodes, max: {max}, median: {median}, average: {average:.3}")]
pub struct EvaluationReport {
    pub episodes: usize,
    pub max: f32,
    pub median: f32,
    pub average: f32,
}

impl EvaluationReport {
    pub fn from_rewards(rewards: &[f32]) -> Result<Self> {
        ensure!(!rewards.is_empty(), "no episode rewards to report on");
        let mut sorted = rewards.to_vec();
        sorted.sort_by(f32::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.
        } else {
            sorted[mid]
        };
        Ok(Self {
            episodes: sorted.len(),
            max: sorted[sorted.len() - 1],
            median,
            average: sorted.iter().sum::<f32>() / sorted.len() as f32,
        })
    }
}

/// Plays test episodes with a fixed parameter vector.
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, params: &ParameterVector, episodes: usize) -> Result<EvaluationReport>;
}

type EnvFactory<E> = dyn Fn(usize) -> Result<E> + Send + Sync;

/// Runs every evaluation episode in its own fresh environment, in parallel.
///
/// Episodes play the stochastic policy with the same warm up and frame skipping as training.
/// The episodic reward is the sum of the raw, unclipped rewards.
pub struct EpisodeEvaluator<E, M> {
    env_factory: Box<EnvFactory<E>>,
    model: Arc<M>,
    skip_num: usize,
    max_episode_steps: usize,
    seed: Option<u64>,
    runs: AtomicU64,
}

impl<E: Environment, M: ActorCriticModel> EpisodeEvaluator<E, M> {
    /// `env_factory` receives the episode index and builds the environment for it.
    pub fn new(
        env_factory: impl Fn(usize) -> Result<E> + Send + Sync + 'static,
        model: Arc<M>,
        skip_num: usize,
        max_episode_steps: usize,
    ) -> Self {
        Self {
            env_factory: Box::new(env_factory),
            model,
            skip_num,
            max_episode_steps,
            seed: None,
            runs: AtomicU64::new(0),
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    fn play_episode(&self, params: &ParameterVector, episode: usize, run: u64) -> Result<f32> {
        let mut env = (self.env_factory)(episode)?;
        let mut rng = stream_rng(self.seed, (run << 32) | episode as u64);
        env.reset()?;
        let num_channels = self.model.observation_shape().num_channels;
        let mut frames = warm_up(&mut env, num_channels, self.skip_num, &mut rng)?;
        let available_actions = env.available_actions();
        let mut episode_reward = 0.;
        let mut steps = 0;
        while !env.is_terminal() && steps < self.max_episode_steps {
            let probs = action_probabilities(&*self.model, params, &frames.observation()?)?;
            let index = sample_action(&probs, &available_actions, &mut rng)?;
            let step = act_with_skip(
                &mut env,
                available_actions[index],
                self.skip_num,
                RewardClipping::default(),
            )?;
            episode_reward += step.raw_reward;
            frames.push(step.frame);
            steps += 1;
        }
        Ok(episode_reward)
    }
}

impl<E: Environment, M: ActorCriticModel> PolicyEvaluator for EpisodeEvaluator<E, M> {
    fn evaluate(&self, params: &ParameterVector, episodes: usize) -> Result<EvaluationReport> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed);
        let rewards = (0..episodes)
            .into_par_iter()
            .map(|episode| self.play_episode(params, episode, run))
            .collect::<Result<Vec<f32>>>()?;
        EvaluationReport::from_rewards(&rewards)
    }
}
