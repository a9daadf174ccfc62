use crate::{
    config::RewardClipping, env::Environment, frame_stack::FrameStack, model::ActorCriticModel,
};
use anyhow::{Context, Result, ensure};
use candle_core::Tensor;
use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
};

/// Result of repeating one action `skip_num` times.
#[derive(Debug)]
pub struct SkippedStep {
    /// Reward after clipping, as stored in the trajectory.
    pub reward: f32,
    pub raw_reward: f32,
    pub frame: Tensor,
}

/// Executes `action` `skip_num` times and combines the intermediate rewards.
pub fn act_with_skip<E: Environment + ?Sized>(
    env: &mut E,
    action: usize,
    skip_num: usize,
    clipping: RewardClipping,
) -> Result<SkippedStep> {
    ensure!(skip_num > 0, "an action has to be executed at least once");
    let mut rewards = Vec::with_capacity(skip_num);
    let mut frame = None;
    for _ in 0..skip_num {
        let (reward, next_frame) = env.act(action)?;
        rewards.push(reward);
        frame = Some(next_frame);
    }
    let frame = frame.context("frame skipping produced no frame")?;
    Ok(SkippedStep {
        reward: clipping.combine(&rewards),
        raw_reward: rewards.iter().sum(),
        frame,
    })
}

/// Builds the first observation of an episode by taking `num_channels` frame skipped random
/// actions. The warm up is not part of any trajectory.
pub fn warm_up<E: Environment + ?Sized, R: Rng>(
    env: &mut E,
    num_channels: usize,
    skip_num: usize,
    rng: &mut R,
) -> Result<FrameStack> {
    let available_actions = env.available_actions();
    ensure!(
        !available_actions.is_empty(),
        "the environment exposes no actions"
    );
    let mut frames = Vec::with_capacity(num_channels);
    for _ in 0..num_channels {
        let mut frame = None;
        for _ in 0..skip_num {
            let action = available_actions[rng.random_range(0..available_actions.len())];
            let (_, next_frame) = env.act(action)?;
            frame = Some(next_frame);
        }
        frames.push(frame.context("warm up produced no frame")?);
    }
    FrameStack::from_frames(frames, num_channels)
}

/// Action probabilities of the policy for a single `[channels, height, width]` observation.
pub fn action_probabilities<M: ActorCriticModel + ?Sized>(
    model: &M,
    params: &[Tensor],
    observation: &Tensor,
) -> Result<Vec<f32>> {
    let (probs, _) = model.pi_and_value(params, &observation.unsqueeze(0)?)?;
    Ok(probs.squeeze(0)?.to_vec1()?)
}

/// Value estimate for a single observation.
pub fn state_value<M: ActorCriticModel + ?Sized>(
    model: &M,
    params: &[Tensor],
    observation: &Tensor,
) -> Result<f32> {
    let (_, value) = model.pi_and_value(params, &observation.unsqueeze(0)?)?;
    Ok(value.flatten_all()?.to_vec1::<f32>()?[0])
}

/// Samples from the policy distribution. Returns the index of the chosen output, the action to
/// execute is `available_actions[index]`.
pub fn sample_action<R: Rng>(
    probabilities: &[f32],
    available_actions: &[usize],
    rng: &mut R,
) -> Result<usize> {
    ensure!(
        probabilities.len() == available_actions.len(),
        "policy returned {} probabilities for {} actions",
        probabilities.len(),
        available_actions.len()
    );
    let distribution = WeightedIndex::new(probabilities)
        .with_context(|| format!("invalid action probabilities {probabilities:?}"))?;
    Ok(distribution.sample(rng))
}
