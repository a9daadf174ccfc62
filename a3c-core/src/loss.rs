use crate::{
    config::A3CConfig,
    tensors::{Advantages, PolicyLoss, TotalLoss, ValueLoss},
    utils::trajectory::TrainingBatch,
};
use candle_core::{Result, Tensor};

#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    pub entropy_beta: f32,
    pub log_epsilon: f32,
    pub value_loss_coef: f32,
}

impl From<&A3CConfig> for LossWeights {
    fn from(config: &A3CConfig) -> Self {
        Self {
            entropy_beta: config.entropy_beta,
            log_epsilon: config.log_epsilon,
            value_loss_coef: config.value_loss_coef,
        }
    }
}

#[derive(Debug)]
pub struct ActorCriticLosses {
    pub policy_loss: PolicyLoss,
    pub value_loss: ValueLoss,
    pub total: TotalLoss,
    /// Mean entropy of the policy over the batch, for reporting.
    pub entropy: f32,
}

/// Policy and value losses of a whole segment, summed over the batch.
///
/// `probs` is `[batch, actions]` and `values` is `[batch, 1]`. The policy term is
/// `-sum(log(pi(a|s) + eps) * (R - V(s))) + beta * sum(pi * log(pi + eps))`, the value term is
/// `sum((R - V(s))^2)`. Both terms differentiate through `V(s)`.
pub fn actor_critic_losses(
    probs: &Tensor,
    values: &Tensor,
    batch: &TrainingBatch,
    weights: LossWeights,
) -> Result<ActorCriticLosses> {
    let eps = weights.log_epsilon as f64;
    let log_pi = probs.affine(1., eps)?.log()?;
    // sum_a pi * log(pi), the negated entropy of every row
    let negative_entropy = probs.mul(&log_pi)?.sum_keepdim(1)?;
    let pi_a_s = probs.mul(&batch.actions)?.sum_keepdim(1)?;
    let log_pi_a_s = pi_a_s.affine(1., eps)?.log()?;
    let advantages = Advantages(batch.returns.sub(values)?);

    let policy_gradient_term = log_pi_a_s.mul(&advantages)?.sum_all()?.neg()?;
    let entropy_term = negative_entropy
        .sum_all()?
        .affine(weights.entropy_beta as f64, 0.)?;
    let policy_loss = PolicyLoss(policy_gradient_term.add(&entropy_term)?);
    let value_loss = ValueLoss(advantages.sqr()?.sum_all()?);
    let total = TotalLoss(
        value_loss
            .affine(weights.value_loss_coef as f64, 0.)?
            .add(&policy_loss)?,
    );
    let entropy = negative_entropy.neg()?.mean_all()?.to_scalar::<f32>()?;
    Ok(ActorCriticLosses {
        policy_loss,
        value_loss,
        total,
        entropy,
    })
}
