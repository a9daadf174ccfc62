use crate::builders::{a3c::A3CBuilder, network::NetworkBuilder, optimizer::OptimizerBuilder};
use a3c_core::{A3CConfig, CoordinatorOptions, Environment, EnvironmentDescription};
use a3c_envs::{Catch, CatchAction, CatchConfig};
use anyhow::{Result, bail};
use candle_core::{Device, Tensor};
use std::time::Duration;

/// A 6x6 field with two balls per episode, fast enough for many test episodes.
pub fn tiny_catch(seed: u64) -> CatchConfig {
    CatchConfig {
        width: 6,
        height: 6,
        paddle_width: 2,
        balls_per_episode: 2,
        seed: Some(seed),
    }
}

pub fn catch_factory(config: CatchConfig) -> impl Fn(usize) -> Result<Catch> + Send + Sync {
    move |stream| Catch::new(config.clone(), stream as u64)
}

/// Small mlp on two stacked frames of `catch`, sgd updates, no frame skipping.
pub fn mlp_builder(catch: &CatchConfig, num_workers: usize, max_global_step: u64) -> A3CBuilder {
    let description =
        EnvironmentDescription::new(catch.width, catch.height, CatchAction::IDS.len());
    A3CBuilder {
        config: A3CConfig {
            skip_num: 1,
            max_global_step,
            seed: catch.seed,
            ..Default::default()
        },
        num_workers,
        network: NetworkBuilder::mlp_for(&description, 2, vec![16]),
        optimizer: OptimizerBuilder::sgd(1e-3),
        coordinator: CoordinatorOptions {
            join_poll_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(5),
            report_interval: Duration::from_millis(200),
        },
        evaluation: None,
        resume_from: None,
    }
}

/// One row of cells, the agent starts on the left and is rewarded for reaching the right end.
/// Action 0 moves left, 1 moves right. Building one with `fail_on_act` makes that action an
/// error, to exercise failure handling.
#[derive(Debug, Clone)]
pub struct Corridor {
    length: usize,
    position: usize,
    fail_on_act: Option<usize>,
    acts: usize,
}

impl Corridor {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(2),
            position: 0,
            fail_on_act: None,
            acts: 0,
        }
    }

    pub fn failing_on_act(mut self, act: usize) -> Self {
        self.fail_on_act = Some(act);
        self
    }

    fn frame(&self) -> Result<Tensor> {
        let mut cells = vec![0f32; self.length];
        cells[self.position] = 1.;
        Ok(Tensor::from_vec(cells, (1, self.length), &Device::Cpu)?)
    }
}

impl Environment for Corridor {
    fn reset(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn act(&mut self, action: usize) -> Result<(f32, Tensor)> {
        self.acts += 1;
        if self.fail_on_act == Some(self.acts) {
            bail!("corridor broke down on act {}", self.acts);
        }
        if self.is_terminal() {
            return Ok((0., self.frame()?));
        }
        match action {
            0 => self.position = self.position.saturating_sub(1),
            1 => self.position += 1,
            _ => bail!("corridor has no action {action}"),
        }
        let reward = if self.is_terminal() { 1. } else { 0. };
        Ok((reward, self.frame()?))
    }

    fn is_terminal(&self) -> bool {
        self.position == self.length - 1
    }

    fn available_actions(&self) -> Vec<usize> {
        vec![0, 1]
    }

    fn description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(self.length, 1, 2)
    }
}
