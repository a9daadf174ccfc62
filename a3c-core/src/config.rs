use derive_more::{Display, Error};

/// How rewards of the repeated (frame skipped) sub-steps are clamped before they are stored in
/// the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewardClipping {
    /// Every intermediate reward is clamped to `[-1, 1]`, then the clamped rewards are summed.
    #[default]
    PerSubStep,
    /// The raw rewards of all sub-steps are summed and only the sum is clamped to `[-1, 1]`.
    PerOuterStep,
}

impl RewardClipping {
    /// Combines the raw rewards of one outer step into the reward stored in the trajectory.
    pub fn combine(&self, rewards: &[f32]) -> f32 {
        match self {
            Self::PerSubStep => rewards.iter().map(|r| r.clamp(-1., 1.)).sum(),
            Self::PerOuterStep => rewards.iter().sum::<f32>().clamp(-1., 1.),
        }
    }
}

#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[display(
        "environment frames are {env_width}x{env_height} but the model expects {model_width}x{model_height}"
    )]
    ObservationShape {
        env_width: usize,
        env_height: usize,
        model_width: usize,
        model_height: usize,
    },
    #[display("environment exposes {environment} actions but the model outputs {model}")]
    ActionCount { environment: usize, model: usize },
    #[display("action id {action} is outside of the model's action space of size {num_actions}")]
    ActionOutOfRange { action: usize, num_actions: usize },
    #[display("invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperparameter { name: &'static str, reason: String },
    #[display("at least one worker is required")]
    NoWorkers,
}

/// Hyperparameters shared by every actor-learner. They are fixed once training starts.
#[derive(Debug, Clone)]
pub struct A3CConfig {
    /// Maximum number of steps in a rollout segment.
    pub t_max: usize,
    pub gamma: f32,
    pub entropy_beta: f32,
    /// Added inside every logarithm of the policy loss.
    pub log_epsilon: f32,
    pub value_loss_coef: f32,
    /// Every gradient element is clamped into `[-grad_clip, grad_clip]` before it is applied.
    pub grad_clip: f32,
    /// Number of times an action is repeated per step.
    pub skip_num: usize,
    pub max_global_step: u64,
    pub reward_clipping: RewardClipping,
    pub seed: Option<u64>,
}

impl Default for A3CConfig {
    fn default() -> Self {
        Self {
            t_max: 10,
            gamma: 0.99,
            entropy_beta: 0.01,
            log_epsilon: 1e-10,
            value_loss_coef: 0.5,
            grad_clip: 40.,
            skip_num: 4,
            max_global_step: 1_000_000_000,
            reward_clipping: RewardClipping::default(),
            seed: None,
        }
    }
}

impl A3CConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name, reason: &str| {
            Err(ConfigError::InvalidHyperparameter {
                name,
                reason: reason.to_owned(),
            })
        };
        if self.t_max == 0 {
            return invalid("t_max", "rollout horizon must be positive");
        }
        if self.skip_num == 0 {
            return invalid("skip_num", "every action has to be executed at least once");
        }
        if !(0. ..=1.).contains(&self.gamma) {
            return invalid("gamma", "discount must be within [0, 1]");
        }
        if !(self.grad_clip > 0.) {
            return invalid("grad_clip", "clip bound must be positive");
        }
        if !(self.log_epsilon >= 0.) {
            return invalid("log_epsilon", "must not be negative");
        }
        if !(self.entropy_beta >= 0.) || !(self.value_loss_coef >= 0.) {
            return invalid("loss weights", "must not be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(A3CConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let config = A3CConfig {
            t_max: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHyperparameter { name: "t_max", .. })
        ));
    }

    #[test]
    fn reward_clipping_modes_differ_on_large_sub_rewards() {
        let rewards = [2., 2., -1., 0.5];
        assert_eq!(RewardClipping::PerSubStep.combine(&rewards), 1.5);
        assert_eq!(RewardClipping::PerOuterStep.combine(&rewards), 1.);
    }
}
