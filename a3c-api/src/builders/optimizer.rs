use a3c_core::{
    ParameterSchema,
    optimizer::{LearningRate, OptimizerKind, RmsPropParams, SharedRmsProp, Sgd},
};
use anyhow::{Result, ensure};
use candle_core::Device;

#[derive(Debug, Clone, Copy)]
pub enum OptimizerBuilder {
    RmsProp {
        learning_rate: f64,
        decay: f64,
        epsilon: f64,
        /// Global step at which the learning rate has decayed linearly to zero.
        anneal_until: Option<u64>,
    },
    Sgd {
        learning_rate: f64,
    },
}

impl Default for OptimizerBuilder {
    fn default() -> Self {
        let RmsPropParams {
            learning_rate,
            decay,
            epsilon,
        } = RmsPropParams::default();
        Self::RmsProp {
            learning_rate: learning_rate.initial,
            decay,
            epsilon,
            anneal_until: learning_rate.anneal_until,
        }
    }
}

impl OptimizerBuilder {
    pub fn sgd(learning_rate: f64) -> Self {
        Self::Sgd { learning_rate }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::RmsProp { learning_rate, .. } | Self::Sgd { learning_rate } => *learning_rate,
        }
    }

    pub fn build(&self, schema: &ParameterSchema, device: &Device) -> Result<OptimizerKind> {
        ensure!(
            self.learning_rate() > 0.,
            "learning rate has to be positive, got {}",
            self.learning_rate()
        );
        let optimizer = match *self {
            Self::RmsProp {
                learning_rate,
                decay,
                epsilon,
                anneal_until,
            } => {
                ensure!((0. ..1.).contains(&decay), "rmsprop decay {decay} outside of [0, 1)");
                let params = RmsPropParams {
                    learning_rate: LearningRate {
                        initial: learning_rate,
                        anneal_until,
                    },
                    decay,
                    epsilon,
                };
                SharedRmsProp::new(params, schema, device)?.into()
            }
            Self::Sgd { learning_rate } => Sgd {
                learning_rate: LearningRate::constant(learning_rate),
            }
            .into(),
        };
        Ok(optimizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3c_core::{ParameterSpec, optimizer::SharedOptimizer};
    use candle_core::DType;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(vec![ParameterSpec::new("w", (2, 2), DType::F32)])
    }

    #[test]
    fn default_is_annealable_rmsprop() -> Result<()> {
        let mut builder = OptimizerBuilder::default();
        if let OptimizerBuilder::RmsProp { anneal_until, .. } = &mut builder {
            *anneal_until = Some(100);
        }
        let optimizer = builder.build(&schema(), &Device::Cpu)?;
        assert!(matches!(optimizer, OptimizerKind::RmsProp(_)));
        assert!((optimizer.learning_rate(0) - 7e-4).abs() < 1e-12);
        assert!((optimizer.learning_rate(50) - 3.5e-4).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(OptimizerBuilder::sgd(0.).build(&schema(), &Device::Cpu).is_err());
        let builder = OptimizerBuilder::RmsProp {
            learning_rate: 1e-3,
            decay: 1.5,
            epsilon: 0.1,
            anneal_until: None,
        };
        assert!(builder.build(&schema(), &Device::Cpu).is_err());
    }
}
