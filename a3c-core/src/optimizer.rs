use crate::parameters::ParameterSchema;
use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use enum_dispatch::enum_dispatch;

/// Gradient based update rule of the shared parameters.
///
/// Implementations may keep per parameter state (moving averages), it is only ever touched from
/// inside the shared store's apply, one call at a time.
#[enum_dispatch]
pub trait SharedOptimizer: Send {
    /// Computes the updated parameters. `global_step` is the step count before this update.
    fn step(&mut self, params: &[Tensor], grads: &[Tensor], global_step: u64)
    -> Result<Vec<Tensor>>;

    fn learning_rate(&self, global_step: u64) -> f64;
}

#[enum_dispatch(SharedOptimizer)]
#[derive(Debug)]
pub enum OptimizerKind {
    RmsProp(SharedRmsProp),
    Sgd(Sgd),
}

/// Learning rate that optionally decays linearly to zero at `anneal_until` global steps.
#[derive(Debug, Clone, Copy)]
pub struct LearningRate {
    pub initial: f64,
    pub anneal_until: Option<u64>,
}

impl LearningRate {
    pub fn constant(initial: f64) -> Self {
        Self {
            initial,
            anneal_until: None,
        }
    }

    pub fn at(&self, global_step: u64) -> f64 {
        match self.anneal_until {
            Some(until) if until > 0 => {
                let remaining = 1. - global_step as f64 / until as f64;
                self.initial * remaining.max(0.)
            }
            _ => self.initial,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RmsPropParams {
    pub learning_rate: LearningRate,
    pub decay: f64,
    pub epsilon: f64,
}

impl Default for RmsPropParams {
    fn default() -> Self {
        Self {
            learning_rate: LearningRate::constant(7e-4),
            decay: 0.99,
            epsilon: 0.1,
        }
    }
}

/// RMSProp with a single set of mean square statistics shared by all workers.
#[derive(Debug)]
pub struct SharedRmsProp {
    params: RmsPropParams,
    mean_squares: Vec<Tensor>,
}

impl SharedRmsProp {
    pub fn new(params: RmsPropParams, schema: &ParameterSchema, device: &Device) -> Result<Self> {
        Ok(Self {
            params,
            mean_squares: schema.zeros(device)?,
        })
    }

    pub fn mean_squares(&self) -> &[Tensor] {
        &self.mean_squares
    }
}

impl SharedOptimizer for SharedRmsProp {
    fn step(
        &mut self,
        params: &[Tensor],
        grads: &[Tensor],
        global_step: u64,
    ) -> Result<Vec<Tensor>> {
        ensure!(
            params.len() == grads.len() && grads.len() == self.mean_squares.len(),
            "rmsprop expects {} gradients, got {}",
            self.mean_squares.len(),
            grads.len()
        );
        let RmsPropParams { decay, epsilon, .. } = self.params;
        let lr = self.learning_rate(global_step);
        let mut updated = Vec::with_capacity(params.len());
        for ((param, grad), mean_square) in params.iter().zip(grads).zip(&mut self.mean_squares) {
            let next_mean_square = mean_square
                .affine(decay, 0.)?
                .add(&grad.sqr()?.affine(1. - decay, 0.)?)?
                .detach();
            let step = grad
                .div(&next_mean_square.affine(1., epsilon)?.sqrt()?)?
                .affine(lr, 0.)?;
            updated.push(param.sub(&step)?.detach());
            *mean_square = next_mean_square;
        }
        Ok(updated)
    }

    fn learning_rate(&self, global_step: u64) -> f64 {
        self.params.learning_rate.at(global_step)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    pub learning_rate: LearningRate,
}

impl SharedOptimizer for Sgd {
    fn step(
        &mut self,
        params: &[Tensor],
        grads: &[Tensor],
        global_step: u64,
    ) -> Result<Vec<Tensor>> {
        ensure!(
            params.len() == grads.len(),
            "sgd expects {} gradients, got {}",
            params.len(),
            grads.len()
        );
        let lr = self.learning_rate(global_step);
        params
            .iter()
            .zip(grads)
            .map(|(param, grad)| Ok(param.sub(&grad.affine(lr, 0.)?)?.detach()))
            .collect()
    }

    fn learning_rate(&self, global_step: u64) -> f64 {
        self.learning_rate.at(global_step)
    }
}
