use crate::config::ConfigError;
use anyhow::Result;
use candle_core::Tensor;

/// Shape of a single stacked observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationShape {
    pub width: usize,
    pub height: usize,
    pub num_channels: usize,
}

impl ObservationShape {
    pub fn new(width: usize, height: usize, num_channels: usize) -> Self {
        Self {
            width,
            height,
            num_channels,
        }
    }

    pub fn size(&self) -> usize {
        self.width * self.height * self.num_channels
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescription {
    pub frame_width: usize,
    pub frame_height: usize,
    pub num_actions: usize,
}

impl EnvironmentDescription {
    pub fn new(frame_width: usize, frame_height: usize, num_actions: usize) -> Self {
        Self {
            frame_width,
            frame_height,
            num_actions,
        }
    }

    /// Checks that frames of this environment and the given action ids fit a model.
    pub fn check_compatible(
        &self,
        available_actions: &[usize],
        observation_shape: &ObservationShape,
        num_actions: usize,
    ) -> Result<(), ConfigError> {
        if self.frame_width != observation_shape.width
            || self.frame_height != observation_shape.height
        {
            return Err(ConfigError::ObservationShape {
                env_width: self.frame_width,
                env_height: self.frame_height,
                model_width: observation_shape.width,
                model_height: observation_shape.height,
            });
        }
        if available_actions.len() != num_actions {
            return Err(ConfigError::ActionCount {
                environment: available_actions.len(),
                model: num_actions,
            });
        }
        if let Some(&action) = available_actions.iter().find(|a| **a >= num_actions) {
            return Err(ConfigError::ActionOutOfRange {
                action,
                num_actions,
            });
        }
        Ok(())
    }
}

/// The environment adapter consumed by the actor-learners.
///
/// Frames are `height x width` f32 tensors. Actions are small non-negative integers taken from
/// [`Environment::available_actions`].
pub trait Environment: Send {
    fn reset(&mut self) -> Result<()>;

    /// Executes an action once, returning the raw reward and the next frame.
    fn act(&mut self, action: usize) -> Result<(f32, Tensor)>;

    fn is_terminal(&self) -> bool;

    fn available_actions(&self) -> Vec<usize>;

    fn description(&self) -> EnvironmentDescription;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn act(&mut self, action: usize) -> Result<(f32, Tensor)> {
        (**self).act(action)
    }

    fn is_terminal(&self) -> bool {
        (**self).is_terminal()
    }

    fn available_actions(&self) -> Vec<usize> {
        (**self).available_actions()
    }

    fn description(&self) -> EnvironmentDescription {
        (**self).description()
    }
}
