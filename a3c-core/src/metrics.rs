use log::info;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// Process wide training counters, shared by all workers of one coordinator.
#[derive(Debug, Default)]
pub struct TrainingMetrics {
    env_frames: AtomicU64,
    segments: AtomicU64,
    episodes: AtomicU64,
    // f64 bits of the summed episode rewards
    episode_reward_bits: AtomicU64,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frames(&self, frames: u64) {
        self.env_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_segment(&self) {
        self.segments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_episode(&self, reward: f32) {
        self.episodes.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .episode_reward_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + reward as f64).to_bits())
            });
    }

    pub fn env_frames(&self) -> u64 {
        self.env_frames.load(Ordering::Relaxed)
    }

    pub fn segments(&self) -> u64 {
        self.segments.load(Ordering::Relaxed)
    }

    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    pub fn mean_episode_reward(&self) -> Option<f64> {
        let episodes = self.episodes();
        (episodes > 0).then(|| {
            f64::from_bits(self.episode_reward_bits.load(Ordering::Relaxed)) / episodes as f64
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    pub global_step: u64,
    pub steps: u64,
    pub frames: u64,
    pub elapsed_secs: f64,
}

impl ThroughputReport {
    pub fn steps_per_sec(&self) -> f64 {
        if self.elapsed_secs > 0. {
            self.steps as f64 / self.elapsed_secs
        } else {
            0.
        }
    }

    pub fn frames_per_sec(&self) -> f64 {
        if self.elapsed_secs > 0. {
            self.frames as f64 / self.elapsed_secs
        } else {
            0.
        }
    }
}

/// Turns the counters into periodic throughput reports.
#[derive(Debug)]
pub struct ThroughputReporter {
    started: Instant,
    previous_time: Instant,
    previous_step: u64,
    previous_frames: u64,
}

impl ThroughputReporter {
    pub fn start(global_step: u64, metrics: &TrainingMetrics) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            previous_time: now,
            previous_step: global_step,
            previous_frames: metrics.env_frames(),
        }
    }

    /// Everything that happened since the previous report.
    pub fn report(&mut self, global_step: u64, metrics: &TrainingMetrics) -> ThroughputReport {
        let now = Instant::now();
        let frames = metrics.env_frames();
        let report = ThroughputReport {
            global_step,
            steps: global_step.saturating_sub(self.previous_step),
            frames: frames.saturating_sub(self.previous_frames),
            elapsed_secs: now.duration_since(self.previous_time).as_secs_f64(),
        };
        self.previous_time = now;
        self.previous_step = global_step;
        self.previous_frames = frames;
        info!(
            "global step: {:<10} {:.0} steps/s {:.2}M steps/hour {:.0} frames/s",
            report.global_step,
            report.steps_per_sec(),
            report.steps_per_sec() * 3600. / 1e6,
            report.frames_per_sec()
        );
        report
    }

    /// Final summary, logged once when training shuts down.
    pub fn flush(&self, global_step: u64, metrics: &TrainingMetrics) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let mean_reward = metrics
            .mean_episode_reward()
            .map_or_else(|| "n/a".to_owned(), |r| format!("{r:.2}"));
        info!(
            "training finished: global step {} after {:.1}s, {} segments, {} frames, {} episodes, mean episode reward {}",
            global_step,
            elapsed,
            metrics.segments(),
            metrics.env_frames(),
            metrics.episodes(),
            mean_reward
        );
    }
}
