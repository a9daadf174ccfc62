use a3c_candle::{NetworkKind, atari::AtariNetwork, mlp::MlpNetwork};
use a3c_core::{EnvironmentDescription, ObservationShape};
use anyhow::Result;

pub enum NetworkBuilder {
    Atari {
        width: usize,
        height: usize,
        channels: usize,
        actions: usize,
    },
    Mlp {
        width: usize,
        height: usize,
        channels: usize,
        actions: usize,
        hidden: Vec<usize>,
    },
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::Atari {
            width: 84,
            height: 84,
            channels: 4,
            actions: 4,
        }
    }
}

impl NetworkBuilder {
    pub fn atari_for(description: &EnvironmentDescription, channels: usize) -> Self {
        Self::Atari {
            width: description.frame_width,
            height: description.frame_height,
            channels,
            actions: description.num_actions,
        }
    }

    pub fn mlp_for(
        description: &EnvironmentDescription,
        channels: usize,
        hidden: Vec<usize>,
    ) -> Self {
        Self::Mlp {
            width: description.frame_width,
            height: description.frame_height,
            channels,
            actions: description.num_actions,
            hidden,
        }
    }

    pub fn observation_shape(&self) -> ObservationShape {
        match self {
            Self::Atari {
                width,
                height,
                channels,
                ..
            }
            | Self::Mlp {
                width,
                height,
                channels,
                ..
            } => ObservationShape::new(*width, *height, *channels),
        }
    }

    pub fn build(&self) -> Result<NetworkKind> {
        let shape = self.observation_shape();
        let network = match self {
            Self::Atari { actions, .. } => AtariNetwork::new(shape, *actions)?.into(),
            Self::Mlp {
                actions, hidden, ..
            } => MlpNetwork::new(shape, *actions, hidden).into(),
        };
        Ok(network)
    }
}
