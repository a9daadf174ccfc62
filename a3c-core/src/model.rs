use crate::{env::ObservationShape, parameters::ParameterSchema, parameters::ParameterVector};
use anyhow::Result;
use candle_core::{Device, Tensor};

/// The network model consumed by the actor-learners.
///
/// The model itself is stateless: parameters are always passed in explicitly, laid out after
/// [`ActorCriticModel::schema`]. Passing candle variables makes the outputs differentiable with
/// respect to them.
pub trait ActorCriticModel: Send + Sync {
    fn schema(&self) -> &ParameterSchema;

    fn observation_shape(&self) -> ObservationShape;

    fn num_actions(&self) -> usize;

    fn initial_parameters(&self, device: &Device) -> Result<ParameterVector>;

    /// Takes a `[batch, channels, height, width]` observation batch and returns the action
    /// probabilities `[batch, actions]` and the value estimates `[batch, 1]`.
    fn pi_and_value(&self, params: &[Tensor], observations: &Tensor) -> Result<(Tensor, Tensor)>;
}
