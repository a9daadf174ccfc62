use anyhow::{Result, ensure};
use candle_core::Tensor;
use std::collections::VecDeque;

/// The last `num_channels` frames of an environment, oldest first.
#[derive(Debug, Clone)]
pub struct FrameStack {
    frames: VecDeque<Tensor>,
    num_channels: usize,
}

impl FrameStack {
    /// Builds a full stack out of exactly `num_channels` frames.
    pub fn from_frames(frames: Vec<Tensor>, num_channels: usize) -> Result<Self> {
        ensure!(
            frames.len() == num_channels,
            "a frame stack needs {num_channels} frames, got {}",
            frames.len()
        );
        Ok(Self {
            frames: frames.into(),
            num_channels,
        })
    }

    /// Appends the newest frame and drops the oldest one.
    pub fn push(&mut self, frame: Tensor) {
        if self.frames.len() == self.num_channels {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// The stacked observation with shape `[channels, height, width]`.
    pub fn observation(&self) -> Result<Tensor> {
        let frames: Vec<&Tensor> = self.frames.iter().collect();
        Ok(Tensor::stack(&frames, 0)?)
    }
}
