use crate::layers::DenseLayer;
use a3c_core::{ActorCriticModel, ObservationShape, ParameterSchema, ParameterVector};
use anyhow::Result;
use candle_core::{D, Device, Tensor};
use candle_nn::ops::softmax;

/// Actor-critic on flattened observations: a relu trunk shared by the policy and value heads.
#[derive(Debug, Clone)]
pub struct MlpNetwork {
    schema: ParameterSchema,
    shape: ObservationShape,
    num_actions: usize,
    trunk: Vec<DenseLayer>,
    policy: DenseLayer,
    value: DenseLayer,
}

impl MlpNetwork {
    pub fn new(shape: ObservationShape, num_actions: usize, hidden: &[usize]) -> Self {
        let mut schema = ParameterSchema::default();
        let mut trunk = Vec::with_capacity(hidden.len());
        let mut last_dim = shape.size();
        for (idx, units) in hidden.iter().enumerate() {
            trunk.push(DenseLayer::register(
                &mut schema,
                &format!("hidden{idx}"),
                last_dim,
                *units,
            ));
            last_dim = *units;
        }
        let policy = DenseLayer::register(&mut schema, "policy", last_dim, num_actions);
        let value = DenseLayer::register(&mut schema, "value", last_dim, 1);
        Self {
            schema,
            shape,
            num_actions,
            trunk,
            policy,
            value,
        }
    }
}

impl ActorCriticModel for MlpNetwork {
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
        let mut params = Vec::with_capacity(self.schema.len());
        for layer in self.trunk.iter().chain([&self.policy, &self.value]) {
            params.extend(layer.init(device)?);
        }
        Ok(params.into())
    }

    fn pi_and_value(&self, params: &[Tensor], observations: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut xs = observations.flatten_from(1)?;
        for layer in &self.trunk {
            xs = layer.forward(params, &xs)?.relu()?;
        }
        let probs = softmax(&self.policy.forward(params, &xs)?, D::Minus1)?;
        let values = self.value.forward(params, &xs)?;
        Ok((probs, values))
    }
}
