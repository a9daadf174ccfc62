use a3c_core::{
    evaluation::EvaluationReport,
    hooks::{IntoIterationHook, IterationHook, WorkerView},
};
use log::info;
use parking_lot::Mutex;
use std::{path::PathBuf, sync::Arc};

/// Every `interval` iterations: plays `episodes` test episodes with the current shared
/// parameters, logs the result and writes a checkpoint.
pub struct PeriodicEvaluationHook {
    interval: usize,
    episodes: usize,
    checkpoint_path: Option<PathBuf>,
    reports: Arc<Mutex<Vec<EvaluationReport>>>,
}

impl PeriodicEvaluationHook {
    pub fn new(interval: usize, episodes: usize) -> Self {
        Self {
            interval: interval.max(1),
            episodes,
            checkpoint_path: None,
            reports: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Checkpoints are written to `<path>-<global step>.safetensors`.
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Shared handle on every report produced so far.
    pub fn reports(&self) -> Arc<Mutex<Vec<EvaluationReport>>> {
        self.reports.clone()
    }
}

impl IterationHook for PeriodicEvaluationHook {
    fn call_hook(&mut self, worker: &WorkerView, iteration: &usize) -> anyhow::Result<bool> {
        if iteration % self.interval != 0 {
            return Ok(false);
        }
        let epoch = iteration / self.interval;
        if self.episodes > 0 {
            let report = worker.evaluate(self.episodes)?;
            info!(
                epoch = epoch,
                global_step = worker.global_step(),
                max = report.max,
                median = report.median,
                average = report.average;
                "test run finished"
            );
            self.reports.lock().push(report);
        }
        if let Some(path) = &self.checkpoint_path {
            worker.save_parameters(path)?;
        }
        Ok(false)
    }
}

impl IntoIterationHook<()> for PeriodicEvaluationHook {
    fn into_boxed(self) -> Box<dyn IterationHook> {
        Box::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3c_core::{
        ParameterSchema, ParameterSpec, ParameterVector, SharedParameterStore,
        evaluation::PolicyEvaluator,
        optimizer::{LearningRate, Sgd},
        persistence::ParameterSaver,
    };
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct FixedEvaluator {
        calls: AtomicUsize,
    }

    impl PolicyEvaluator for FixedEvaluator {
        fn evaluate(&self, _params: &ParameterVector, episodes: usize) -> Result<EvaluationReport> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let rewards: Vec<f32> = (0..episodes).map(|episode| episode as f32).collect();
            EvaluationReport::from_rewards(&rewards)
        }
    }

    #[derive(Default)]
    struct RecordingSaver {
        saved: Mutex<Vec<(PathBuf, u64)>>,
    }

    impl ParameterSaver for RecordingSaver {
        fn save(
            &self,
            _params: &ParameterVector,
            path: &Path,
            global_step: u64,
        ) -> Result<PathBuf> {
            self.saved.lock().push((path.to_owned(), global_step));
            Ok(path.to_owned())
        }
    }

    fn view(evaluator: Arc<FixedEvaluator>, saver: Arc<RecordingSaver>) -> Result<WorkerView> {
        let schema = ParameterSchema::new(vec![ParameterSpec::new("w", 3, DType::F32)]);
        let params = ParameterVector::new(vec![Tensor::zeros(3, DType::F32, &Device::Cpu)?]);
        let optimizer = Sgd {
            learning_rate: LearningRate::constant(0.1),
        };
        let store = SharedParameterStore::new(schema, params, optimizer.into())?;
        Ok(WorkerView::new(0, Arc::new(store))
            .with_evaluator(evaluator)
            .with_saver(saver))
    }

    #[test]
    fn evaluates_and_saves_every_interval() -> Result<()> {
        let evaluator = Arc::new(FixedEvaluator::default());
        let saver = Arc::new(RecordingSaver::default());
        let view = view(evaluator.clone(), saver.clone())?;
        let mut hook = PeriodicEvaluationHook::new(3, 5).with_checkpoint_path("ckpt/params");
        let reports = hook.reports();
        for iteration in 1..=7 {
            assert!(!hook.call_hook(&view, &iteration)?);
        }
        assert_eq!(evaluator.calls.load(Ordering::Relaxed), 2);
        let reports = reports.lock();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].episodes, 5);
        assert_eq!(reports[0].max, 4.);
        assert_eq!(saver.saved.lock().len(), 2);
        assert_eq!(saver.saved.lock()[0], (PathBuf::from("ckpt/params"), 0));
        Ok(())
    }

    #[test]
    fn missing_collaborators_are_errors() -> Result<()> {
        let schema = ParameterSchema::new(vec![ParameterSpec::new("w", 1, DType::F32)]);
        let params = ParameterVector::new(vec![Tensor::zeros(1, DType::F32, &Device::Cpu)?]);
        let optimizer = Sgd {
            learning_rate: LearningRate::constant(0.1),
        };
        let store = SharedParameterStore::new(schema, params, optimizer.into())?;
        let view = WorkerView::new(0, Arc::new(store));
        let mut hook = PeriodicEvaluationHook::new(1, 2);
        assert!(hook.call_hook(&view, &1).is_err());
        Ok(())
    }
}
