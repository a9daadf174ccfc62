pub mod atari;
pub mod layers;
pub mod mlp;

use a3c_core::{ActorCriticModel, ObservationShape, ParameterSchema, ParameterVector};
use anyhow::Result;
use atari::AtariNetwork;
use candle_core::{Device, Tensor};
use derive_more::From;
use mlp::MlpNetwork;

/// Every network this crate ships, so builders can pick one at runtime.
#[derive(Debug, Clone, From)]
pub enum NetworkKind {
    Atari(AtariNetwork),
    Mlp(MlpNetwork),
}

impl ActorCriticModel for NetworkKind {
    fn schema(&self) -> &ParameterSchema {
        match self {
            Self::Atari(network) => network.schema(),
            Self::Mlp(network) => network.schema(),
        }
    }

    fn observation_shape(&self) -> ObservationShape {
        match self {
            Self::Atari(network) => network.observation_shape(),
            Self::Mlp(network) => network.observation_shape(),
        }
    }

    fn num_actions(&self) -> usize {
        match self {
            Self::Atari(network) => network.num_actions(),
            Self::Mlp(network) => network.num_actions(),
        }
    }

    fn initial_parameters(&self, device: &Device) -> Result<ParameterVector> {
        match self {
            Self::Atari(network) => network.initial_parameters(device),
            Self::Mlp(network) => network.initial_parameters(device),
        }
    }

    fn pi_and_value(&self, params: &[Tensor], observations: &Tensor) -> Result<(Tensor, Tensor)> {
        match self {
            Self::Atari(network) => network.pi_and_value(params, observations),
            Self::Mlp(network) => network.pi_and_value(params, observations),
        }
    }
}
