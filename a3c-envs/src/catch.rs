use a3c_core::{Environment, EnvironmentDescription, rng::stream_rng};
use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use rand::{Rng, rngs::StdRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchAction {
    Noop,
    Left,
    Right,
}

impl CatchAction {
    /// Ids 0 and 3 both leave the paddle where it is, like the fire buttons of a console.
    pub const IDS: [usize; 4] = [0, 1, 2, 3];

    pub fn from_id(id: usize) -> Option<Self> {
        match id {
            0 | 3 => Some(Self::Noop),
            1 => Some(Self::Left),
            2 => Some(Self::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatchConfig {
    pub width: usize,
    pub height: usize,
    pub paddle_width: usize,
    pub balls_per_episode: usize,
    pub seed: Option<u64>,
}

impl Default for CatchConfig {
    fn default() -> Self {
        Self {
            width: 24,
            height: 24,
            paddle_width: 3,
            balls_per_episode: 5,
            seed: None,
        }
    }
}

/// Balls drop from the top row one row per action; the paddle on the bottom row has to be under
/// a ball when it lands. A catch is worth `+1`, a miss `-1`. The episode ends after
/// `balls_per_episode` balls.
#[derive(Debug)]
pub struct Catch {
    config: CatchConfig,
    rng: StdRng,
    device: Device,
    ball: (usize, usize),
    paddle: usize,
    balls_left: usize,
    terminal: bool,
}

impl Catch {
    pub fn new(config: CatchConfig, stream: u64) -> Result<Self> {
        ensure!(
            config.width >= config.paddle_width && config.paddle_width > 0,
            "paddle of width {} does not fit a {} wide field",
            config.paddle_width,
            config.width
        );
        ensure!(config.height >= 2, "the field needs at least two rows");
        ensure!(config.balls_per_episode > 0, "an episode needs at least one ball");
        let rng = stream_rng(config.seed, stream);
        let mut catch = Self {
            config,
            rng,
            device: Device::Cpu,
            ball: (0, 0),
            paddle: 0,
            balls_left: 0,
            terminal: true,
        };
        catch.start_episode();
        Ok(catch)
    }

    fn start_episode(&mut self) {
        self.paddle = (self.config.width - self.config.paddle_width) / 2;
        self.balls_left = self.config.balls_per_episode;
        self.terminal = false;
        self.drop_ball();
    }

    fn drop_ball(&mut self) {
        self.ball = (0, self.rng.random_range(0..self.config.width));
    }

    fn paddle_covers(&self, column: usize) -> bool {
        (self.paddle..self.paddle + self.config.paddle_width).contains(&column)
    }

    pub fn ball(&self) -> (usize, usize) {
        self.ball
    }

    pub fn paddle(&self) -> usize {
        self.paddle
    }

    /// The current screen: ball and paddle pixels are 1, everything else 0.
    pub fn frame(&self) -> Result<Tensor> {
        let CatchConfig { width, height, .. } = self.config;
        let mut pixels = vec![0f32; width * height];
        let (row, column) = self.ball;
        pixels[row * width + column] = 1.;
        for column in self.paddle..self.paddle + self.config.paddle_width {
            pixels[(height - 1) * width + column] = 1.;
        }
        Ok(Tensor::from_vec(pixels, (height, width), &self.device)?)
    }
}

impl Environment for Catch {
    fn reset(&mut self) -> Result<()> {
        self.start_episode();
        Ok(())
    }

    fn act(&mut self, action: usize) -> Result<(f32, Tensor)> {
        let Some(action) = CatchAction::from_id(action) else {
            anyhow::bail!("catch has no action {action}");
        };
        if self.terminal {
            return Ok((0., self.frame()?));
        }
        match action {
            CatchAction::Left => self.paddle = self.paddle.saturating_sub(1),
            CatchAction::Right => {
                self.paddle = (self.paddle + 1).min(self.config.width - self.config.paddle_width)
            }
            CatchAction::Noop => {}
        }
        self.ball.0 += 1;
        let mut reward = 0.;
        if self.ball.0 == self.config.height - 1 {
            reward = if self.paddle_covers(self.ball.1) { 1. } else { -1. };
            self.balls_left -= 1;
            if self.balls_left == 0 {
                self.terminal = true;
            } else {
                let frame = self.frame()?;
                self.drop_ball();
                return Ok((reward, frame));
            }
        }
        Ok((reward, self.frame()?))
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn available_actions(&self) -> Vec<usize> {
        CatchAction::IDS.to_vec()
    }

    fn description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(self.config.width, self.config.height, CatchAction::IDS.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catch(width: usize, height: usize, balls: usize) -> Result<Catch> {
        Catch::new(
            CatchConfig {
                width,
                height,
                paddle_width: 1,
                balls_per_episode: balls,
                seed: Some(3),
            },
            0,
        )
    }

    // Moves the paddle under the ball, then waits for it to land.
    fn chase(env: &mut Catch) -> Result<f32> {
        loop {
            let (_, column) = env.ball();
            let action = match env.paddle().cmp(&column) {
                std::cmp::Ordering::Less => 2,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Equal => 0,
            };
            let (reward, _) = env.act(action)?;
            if reward != 0. {
                return Ok(reward);
            }
        }
    }

    #[test]
    fn following_the_ball_catches_it() -> Result<()> {
        let mut env = catch(5, 10, 3)?;
        for _ in 0..3 {
            assert_eq!(chase(&mut env)?, 1.);
        }
        assert!(env.is_terminal());
        Ok(())
    }

    #[test]
    fn missing_the_ball_costs_a_point() -> Result<()> {
        let mut env = catch(6, 4, 1)?;
        let (_, column) = env.ball();
        // run away from the ball
        let action = if column < 3 { 2 } else { 1 };
        let mut total = 0.;
        while !env.is_terminal() {
            total += env.act(action)?.0;
        }
        assert_eq!(total, -1.);
        Ok(())
    }

    #[test]
    fn frames_show_ball_and_paddle() -> Result<()> {
        let env = catch(5, 7, 1)?;
        let frame = env.frame()?;
        assert_eq!(frame.dims(), &[7, 5]);
        assert_eq!(frame.sum_all()?.to_scalar::<f32>()?, 2.);
        let rows: Vec<Vec<f32>> = frame.to_vec2()?;
        assert_eq!(rows[0][env.ball().1], 1.);
        assert_eq!(rows[6][env.paddle()], 1.);
        Ok(())
    }

    #[test]
    fn reset_starts_a_new_episode() -> Result<()> {
        let mut env = catch(4, 3, 1)?;
        while !env.is_terminal() {
            env.act(0)?;
        }
        assert_eq!(env.act(0)?.0, 0.);
        env.reset()?;
        assert!(!env.is_terminal());
        assert!(env.act(7).is_err());
        Ok(())
    }
}
