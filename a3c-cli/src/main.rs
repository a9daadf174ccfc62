use a3c_api::{
    A3CBuilder, EvaluationSettings, NetworkBuilder, OptimizerBuilder,
    utils::checkpoint_dir::{prepare_checkpoint_dir, resume_checkpoint_dir},
};
use a3c_core::{
    A3CConfig, CoordinatorOptions, EnvironmentDescription, RewardClipping, WorkerStatus,
    coordinator::InterruptHandle,
};
use a3c_envs::{Catch, CatchAction, CatchConfig};
use anyhow::{Result, bail};
use candle_core::Device;
use clap::{ArgAction, Parser, ValueEnum};
use log::{error, info, warn};
use std::{path::PathBuf, thread, time::Duration};
use tokio::signal;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum NetworkType {
    Atari,
    Mlp,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RewardClip {
    PerSubStep,
    PerOuterStep,
}

impl From<RewardClip> for RewardClipping {
    fn from(value: RewardClip) -> Self {
        match value {
            RewardClip::PerSubStep => Self::PerSubStep,
            RewardClip::PerOuterStep => Self::PerOuterStep,
        }
    }
}

/// Trains an actor-critic on the catch game with asynchronous advantage actor-learners.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "checkpoint")]
    checkpoint_dir: PathBuf,

    /// Continue from the newest checkpoint in the checkpoint directory instead of clearing it.
    #[arg(long)]
    resume: bool,

    #[arg(long, default_value_t = 8)]
    threads_num: usize,

    #[arg(long, default_value_t = 1_000_000_000)]
    global_t_max: u64,

    /// Train on the first cuda device when one is available, `--use-gpu false` forces the cpu.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    use_gpu: bool,

    #[arg(long, value_enum, default_value_t = NetworkType::Atari)]
    network: NetworkType,

    /// Hidden layer sizes of the mlp network.
    #[arg(long, value_delimiter = ',', default_value = "256")]
    hidden: Vec<usize>,

    #[arg(long, default_value_t = 84)]
    frame_width: usize,

    #[arg(long, default_value_t = 84)]
    frame_height: usize,

    #[arg(long, default_value_t = 4)]
    num_channels: usize,

    #[arg(long, default_value_t = 5)]
    catch_balls: usize,

    #[arg(long, default_value_t = 3)]
    paddle_width: usize,

    #[arg(long, default_value_t = 2000)]
    eval_interval: usize,

    #[arg(long, default_value_t = 10)]
    eval_episodes: usize,

    #[arg(long, default_value_t = 10_000)]
    eval_max_steps: usize,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = 7e-4)]
    learning_rate: f64,

    /// Decay the learning rate linearly to zero at `global_t_max`.
    #[arg(long)]
    anneal_learning_rate: bool,

    #[arg(long, default_value_t = 0.99)]
    rmsprop_decay: f64,

    #[arg(long, default_value_t = 0.1)]
    rmsprop_epsilon: f64,

    #[arg(long, default_value_t = 10)]
    t_max: usize,

    #[arg(long, default_value_t = 0.99)]
    gamma: f32,

    #[arg(long, default_value_t = 0.01)]
    entropy_beta: f32,

    #[arg(long, default_value_t = 0.5)]
    value_loss_coef: f32,

    #[arg(long, default_value_t = 40.)]
    grad_clip: f32,

    #[arg(long, default_value_t = 4)]
    skip_num: usize,

    #[arg(long, value_enum, default_value_t = RewardClip::PerSubStep)]
    reward_clipping: RewardClip,

    /// Seconds the actor-learners get to finish their iteration after ctrl-c.
    #[arg(long, default_value_t = 60)]
    shutdown_timeout: u64,
}

impl Args {
    fn builder(&self, checkpoint_path: PathBuf, resume_from: Option<PathBuf>) -> A3CBuilder {
        let description = EnvironmentDescription::new(
            self.frame_width,
            self.frame_height,
            CatchAction::IDS.len(),
        );
        let network = match self.network {
            NetworkType::Atari => NetworkBuilder::atari_for(&description, self.num_channels),
            NetworkType::Mlp => {
                NetworkBuilder::mlp_for(&description, self.num_channels, self.hidden.clone())
            }
        };
        A3CBuilder {
            config: A3CConfig {
                t_max: self.t_max,
                gamma: self.gamma,
                entropy_beta: self.entropy_beta,
                value_loss_coef: self.value_loss_coef,
                grad_clip: self.grad_clip,
                skip_num: self.skip_num,
                max_global_step: self.global_t_max,
                reward_clipping: self.reward_clipping.into(),
                seed: self.seed,
                ..Default::default()
            },
            num_workers: self.threads_num,
            network,
            optimizer: OptimizerBuilder::RmsProp {
                learning_rate: self.learning_rate,
                decay: self.rmsprop_decay,
                epsilon: self.rmsprop_epsilon,
                anneal_until: self.anneal_learning_rate.then_some(self.global_t_max),
            },
            coordinator: CoordinatorOptions {
                shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
                ..Default::default()
            },
            evaluation: Some(EvaluationSettings {
                interval: self.eval_interval,
                episodes: self.eval_episodes,
                max_episode_steps: self.eval_max_steps,
                checkpoint_path: Some(checkpoint_path),
            }),
            resume_from,
        }
    }

    fn catch(&self) -> CatchConfig {
        CatchConfig {
            width: self.frame_width,
            height: self.frame_height,
            paddle_width: self.paddle_width,
            balls_per_episode: self.catch_balls,
            seed: self.seed,
        }
    }
}

fn select_device(use_gpu: bool) -> Result<Device> {
    if !use_gpu {
        return Ok(Device::Cpu);
    }
    let device = Device::cuda_if_available(0)?;
    if device.is_cpu() {
        warn!("cuda is not available, training on the cpu");
    }
    Ok(device)
}

// The first ctrl-c stops training gracefully, a second one exits right away.
fn listen_for_interrupt(handle: InterruptHandle) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("a3c-signal".to_owned())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(err) = signal::ctrl_c().await {
                    error!("cannot listen for ctrl-c: {err}");
                    return;
                }
                handle.interrupt();
                if signal::ctrl_c().await.is_ok() {
                    warn!("second interrupt, exiting without waiting for the actor-learners");
                    std::process::exit(130);
                }
            })
        })?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let device = select_device(args.use_gpu)?;

    let (checkpoint_path, resume_from) = if args.resume {
        resume_checkpoint_dir(&args.checkpoint_dir)?
    } else {
        (prepare_checkpoint_dir(&args.checkpoint_dir)?, None)
    };
    let catch = args.catch();
    let coordinator = args.builder(checkpoint_path, resume_from).build(
        move |stream| Catch::new(catch.clone(), stream as u64),
        &device,
    )?;
    listen_for_interrupt(coordinator.stop_handle())?;

    let report = coordinator.run()?;
    for outcome in &report.workers {
        if let WorkerStatus::Finished(summary) = &outcome.status {
            info!(
                worker_id = summary.worker_id,
                iterations = summary.iterations,
                applies = summary.applies,
                episodes = summary.episodes;
                "actor-learner finished"
            );
        }
    }
    info!(
        global_step = report.final_global_step,
        interrupted = report.interrupted;
        "training finished"
    );
    if report.failures().count() == report.workers.len() {
        bail!("every actor-learner failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_is_used_unless_disabled() -> Result<()> {
        assert!(Args::try_parse_from(["a3c"])?.use_gpu);
        assert!(!Args::try_parse_from(["a3c", "--use-gpu", "false"])?.use_gpu);
        Ok(())
    }

    #[test]
    fn defaults_follow_the_reference_setup() -> Result<()> {
        let args = Args::try_parse_from(["a3c", "--hidden", "64,32"])?;
        assert_eq!(args.threads_num, 8);
        assert_eq!(args.t_max, 10);
        assert_eq!(args.skip_num, 4);
        assert_eq!(args.hidden, vec![64, 32]);
        Ok(())
    }
}
