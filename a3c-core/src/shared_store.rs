use crate::{
    optimizer::{OptimizerKind, SharedOptimizer},
    parameters::{ParameterSchema, ParameterVector},
    utils::clip_grad::clip_by_value,
};
use anyhow::{Context, Result};
use crossbeam::sync::ShardedLock;
use log::trace;
use parking_lot::Mutex;
use std::sync::{
    PoisonError,
    atomic::{AtomicU64, Ordering},
};

/// The single authoritative parameter vector, its optimizer state and the global step counter.
///
/// Every parameter tensor sits in its own slot and is replaced as a whole on update, tensors are
/// never written in place. Readers therefore always see a complete tensor, but a snapshot taken
/// while another worker applies may mix tensors from before and after that update.
///
/// Applies are serialised by one lock around the optimizer, the step counter is only advanced
/// while holding it.
pub struct SharedParameterStore {
    schema: ParameterSchema,
    slots: Vec<ShardedLock<candle_core::Tensor>>,
    optimizer: Mutex<OptimizerKind>,
    global_step: AtomicU64,
}

impl SharedParameterStore {
    pub fn new(
        schema: ParameterSchema,
        initial: ParameterVector,
        optimizer: OptimizerKind,
    ) -> Result<Self> {
        Self::from_parameters(schema, initial, optimizer, 0)
    }

    /// Builds a store resuming from `global_step`, e.g. out of a checkpoint.
    pub fn from_parameters(
        schema: ParameterSchema,
        params: ParameterVector,
        optimizer: OptimizerKind,
        global_step: u64,
    ) -> Result<Self> {
        schema
            .validate(&params)
            .context("initial shared parameters do not match the model")?;
        let slots = params
            .into_inner()
            .into_iter()
            .map(|tensor| ShardedLock::new(tensor.detach()))
            .collect();
        Ok(Self {
            schema,
            slots,
            optimizer: Mutex::new(optimizer),
            global_step: AtomicU64::new(global_step),
        })
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn global_step(&self) -> u64 {
        self.global_step.load(Ordering::Acquire)
    }

    /// Reads the current parameters without waiting for concurrent applies.
    pub fn snapshot(&self) -> ParameterVector {
        self.slots
            .iter()
            .map(|slot| slot.read().unwrap_or_else(PoisonError::into_inner).clone())
            .collect::<Vec<_>>()
            .into()
    }

    /// Applies one optimizer step with the given gradients and returns the new global step.
    ///
    /// Gradients that do not match the schema are a caller bug and fail the apply before
    /// anything is modified.
    pub fn apply(&self, grads: &[candle_core::Tensor]) -> Result<u64> {
        self.schema
            .validate(grads)
            .context("gradients applied to the shared store do not match its schema")?;
        let mut optimizer = self.optimizer.lock();
        let step = self.global_step.load(Ordering::Acquire);
        let current = self.snapshot();
        let updated = optimizer.step(&current, grads, step)?;
        for (slot, tensor) in self.slots.iter().zip(updated) {
            *slot.write().unwrap_or_else(PoisonError::into_inner) = tensor;
        }
        let new_step = self.global_step.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(global_step = new_step; "applied gradients to the shared parameters");
        Ok(new_step)
    }

    /// Clamps every gradient element into `[-clip, clip]` and applies the result.
    pub fn apply_clipped(&self, grads: &[candle_core::Tensor], clip: f32) -> Result<u64> {
        let clipped = clip_by_value(grads, clip)?;
        self.apply(&clipped)
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.lock().learning_rate(self.global_step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        optimizer::{LearningRate, Sgd},
        parameters::ParameterSpec,
    };
    use candle_core::{DType, Device, Tensor};
    use std::{collections::HashSet, sync::Arc, thread};

    fn store() -> Result<SharedParameterStore> {
        let device = Device::Cpu;
        let schema = ParameterSchema::new(vec![
            ParameterSpec::new("w", (4, 4), DType::F32),
            ParameterSpec::new("b", 4, DType::F32),
        ]);
        let params = ParameterVector::new(schema.zeros(&device)?);
        let optimizer = OptimizerKind::from(Sgd {
            learning_rate: LearningRate::constant(1.),
        });
        SharedParameterStore::new(schema, params, optimizer)
    }

    fn unit_grads(store: &SharedParameterStore) -> Result<Vec<Tensor>> {
        Ok(store
            .schema()
            .iter()
            .map(|spec| Tensor::ones(spec.shape.clone(), spec.dtype, &Device::Cpu))
            .collect::<candle_core::Result<Vec<_>>>()?)
    }

    #[test]
    fn apply_advances_the_step_and_the_parameters() -> Result<()> {
        let store = store()?;
        let grads = unit_grads(&store)?;
        assert_eq!(store.apply(&grads)?, 1);
        assert_eq!(store.apply(&grads)?, 2);
        let bias = store.snapshot()[1].to_vec1::<f32>()?;
        assert_eq!(bias, vec![-2.; 4]);
        Ok(())
    }

    #[test]
    fn concurrent_applies_claim_unique_steps() -> Result<()> {
        let store = Arc::new(store()?);
        let grads = unit_grads(&store)?;
        let (threads, applies_per_thread) = (8, 25);
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                let grads = grads.clone();
                thread::spawn(move || {
                    (0..applies_per_thread)
                        .map(|_| store.apply(&grads))
                        .collect::<Result<Vec<u64>>>()
                })
            })
            .collect();
        let mut steps = HashSet::new();
        for handle in handles {
            let thread_steps = handle.join().expect("apply thread panicked")?;
            // a single thread observes its own applies in order
            assert!(thread_steps.windows(2).all(|w| w[0] < w[1]));
            steps.extend(thread_steps);
        }
        let total = (threads * applies_per_thread) as u64;
        assert_eq!(store.global_step(), total);
        assert_eq!(steps, (1..=total).collect::<HashSet<_>>());
        let weights: Vec<Vec<f32>> = store.snapshot()[0].to_vec2()?;
        assert!(weights.iter().flatten().all(|w| *w == -(total as f32)));
        Ok(())
    }

    #[test]
    fn mismatched_gradients_fail_without_side_effects() -> Result<()> {
        let store = store()?;
        let grads = vec![Tensor::ones((4, 4), DType::F32, &Device::Cpu)?];
        assert!(store.apply(&grads).is_err());
        assert_eq!(store.global_step(), 0);
        Ok(())
    }

    #[test]
    fn snapshots_never_observe_partial_tensors() -> Result<()> {
        let store = Arc::new(store()?);
        let grads = unit_grads(&store)?;
        let writer = {
            let store = store.clone();
            thread::spawn(move || -> Result<()> {
                for _ in 0..200 {
                    store.apply(&grads)?;
                }
                Ok(())
            })
        };
        for _ in 0..200 {
            for tensor in store.snapshot().iter() {
                let values = tensor.flatten_all()?.to_vec1::<f32>()?;
                assert!(values.iter().all(|v| *v == values[0]));
            }
        }
        writer.join().expect("writer panicked")?;
        Ok(())
    }

    #[test]
    fn clipped_apply_bounds_the_update() -> Result<()> {
        let store = store()?;
        let grads: Vec<Tensor> = unit_grads(&store)?
            .iter()
            .map(|g| g.affine(100., 0.))
            .collect::<candle_core::Result<_>>()?;
        store.apply_clipped(&grads, 40.)?;
        let bias = store.snapshot()[1].to_vec1::<f32>()?;
        assert_eq!(bias, vec![-40.; 4]);
        Ok(())
    }
}
