use crate::layers::{ConvLayer, DenseLayer};
use a3c_core::{ActorCriticModel, ObservationShape, ParameterSchema, ParameterVector};
use anyhow::{Context, Result};
use candle_core::{D, Device, Tensor};
use candle_nn::ops::softmax;

/// Convolutional actor-critic for stacked pixel frames.
///
/// Two convolutions (16 filters 8x8 stride 4, 32 filters 4x4 stride 2) and a 256 unit hidden
/// layer are shared by a softmax policy head and a scalar value head. The parameter vector
/// holds ten tensors.
#[derive(Debug, Clone)]
pub struct AtariNetwork {
    schema: ParameterSchema,
    shape: ObservationShape,
    num_actions: usize,
    conv1: ConvLayer,
    conv2: ConvLayer,
    hidden: DenseLayer,
    policy: DenseLayer,
    value: DenseLayer,
}

impl AtariNetwork {
    pub const HIDDEN_UNITS: usize = 256;

    pub fn new(shape: ObservationShape, num_actions: usize) -> Result<Self> {
        let mut schema = ParameterSchema::default();
        let conv1 = ConvLayer::register(&mut schema, "conv1", shape.num_channels, 16, 8, 4);
        let conv2 = ConvLayer::register(&mut schema, "conv2", 16, 32, 4, 2);
        let feature_size = |size: usize| conv1.output_size(size).and_then(|s| conv2.output_size(s));
        let (height, width) = feature_size(shape.height)
            .zip(feature_size(shape.width))
            .with_context(|| {
                format!(
                    "{}x{} frames are too small for the convolutional network",
                    shape.width, shape.height
                )
            })?;
        let features = conv2.out_channels() * height * width;
        let hidden = DenseLayer::register(&mut schema, "fc3", features, Self::HIDDEN_UNITS);
        let policy = DenseLayer::register(&mut schema, "policy", Self::HIDDEN_UNITS, num_actions);
        let value = DenseLayer::register(&mut schema, "value", Self::HIDDEN_UNITS, 1);
        Ok(Self {
            schema,
            shape,
            num_actions,
            conv1,
            conv2,
            hidden,
            policy,
            value,
        })
    }
}

impl ActorCriticModel for AtariNetwork {
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
        params.extend(self.conv1.init(device)?);
        params.extend(self.conv2.init(device)?);
        params.extend(self.hidden.init(device)?);
        params.extend(self.policy.init(device)?);
        params.extend(self.value.init(device)?);
        Ok(params.into())
    }

    fn pi_and_value(&self, params: &[Tensor], observations: &Tensor) -> Result<(Tensor, Tensor)> {
        let xs = self.conv1.forward(params, observations)?.relu()?;
        let xs = self.conv2.forward(params, &xs)?.relu()?;
        let xs = self.hidden.forward(params, &xs.flatten_from(1)?)?.relu()?;
        let probs = softmax(&self.policy.forward(params, &xs)?, D::Minus1)?;
        let values = self.value.forward(params, &xs)?;
        Ok((probs, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_network_has_ten_parameter_tensors() -> Result<()> {
        let network = AtariNetwork::new(ObservationShape::new(84, 84, 4), 4)?;
        assert_eq!(network.schema().len(), 10);
        // 84 -> 20 -> 9
        assert_eq!(network.schema()[4].shape.dims(), &[256, 32 * 9 * 9]);
        let params = network.initial_parameters(&Device::Cpu)?;
        network.schema().validate(&params)?;
        Ok(())
    }

    #[test]
    fn forward_produces_a_distribution_and_a_value() -> Result<()> {
        let device = Device::Cpu;
        let network = AtariNetwork::new(ObservationShape::new(24, 20, 2), 3)?;
        let params = network.initial_parameters(&device)?;
        let observations = Tensor::rand(0f32, 1., (5, 2, 20, 24), &device)?;
        let (probs, values) = network.pi_and_value(&params, &observations)?;
        assert_eq!(probs.dims(), &[5, 3]);
        assert_eq!(values.dims(), &[5, 1]);
        let sums: Vec<f32> = probs.sum(1)?.to_vec1()?;
        assert!(sums.iter().all(|s| (s - 1.).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn tiny_frames_are_rejected() {
        assert!(AtariNetwork::new(ObservationShape::new(10, 10, 4), 4).is_err());
    }
}
