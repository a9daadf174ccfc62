use crate::parameters::ParameterSchema;
use anyhow::{Context, Result};
use candle_core::{Device, Tensor};

/// Per worker gradient buffer, laid out after the model's parameter schema.
///
/// Holds the sum of all gradients accumulated since the last [`GradientAccumulator::reset`]. A
/// freshly built accumulator is already reset.
#[derive(Debug)]
pub struct GradientAccumulator {
    schema: ParameterSchema,
    grads: Vec<Tensor>,
    device: Device,
}

impl GradientAccumulator {
    pub fn new(schema: ParameterSchema, device: &Device) -> Result<Self> {
        let grads = schema.zeros(device)?;
        Ok(Self {
            schema,
            grads,
            device: device.clone(),
        })
    }

    pub fn reset(&mut self) -> Result<()> {
        self.grads = self.schema.zeros(&self.device)?;
        Ok(())
    }

    /// Adds every gradient tensor element-wise into the held tensor at the same position.
    pub fn accumulate(&mut self, grads: &[Tensor]) -> Result<()> {
        self.schema
            .validate(grads)
            .context("accumulating gradients")?;
        for (held, grad) in self.grads.iter_mut().zip(grads) {
            *held = held.add(grad)?.detach();
        }
        Ok(())
    }

    pub fn gradients(&self) -> &[Tensor] {
        &self.grads
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterSpec;
    use candle_core::DType;

    fn accumulator() -> Result<GradientAccumulator> {
        let schema = ParameterSchema::new(vec![
            ParameterSpec::new("w", (2, 2), DType::F32),
            ParameterSpec::new("b", 2, DType::F32),
        ]);
        GradientAccumulator::new(schema, &Device::Cpu)
    }

    fn grads(scale: f32) -> Result<Vec<Tensor>> {
        let device = Device::Cpu;
        Ok(vec![
            Tensor::new(&[[1f32, -2.], [3., 0.5]], &device)?.affine(scale as f64, 0.)?,
            Tensor::new(&[4f32, -8.], &device)?.affine(scale as f64, 0.)?,
        ])
    }

    fn flat(accumulator: &GradientAccumulator) -> Result<Vec<f32>> {
        let mut values = vec![];
        for grad in accumulator.gradients() {
            values.extend(grad.flatten_all()?.to_vec1::<f32>()?);
        }
        Ok(values)
    }

    #[test]
    fn starts_zeroed() -> Result<()> {
        let accumulator = accumulator()?;
        assert!(flat(&accumulator)?.iter().all(|v| *v == 0.));
        Ok(())
    }

    #[test]
    fn once_equals_two_halves() -> Result<()> {
        let mut once = accumulator()?;
        once.accumulate(&grads(1.)?)?;
        let mut halves = accumulator()?;
        halves.accumulate(&grads(0.5)?)?;
        halves.accumulate(&grads(0.5)?)?;
        assert_eq!(flat(&once)?, flat(&halves)?);
        Ok(())
    }

    #[test]
    fn reset_discards_previous_segments() -> Result<()> {
        let mut accumulator = accumulator()?;
        accumulator.accumulate(&grads(3.)?)?;
        accumulator.reset()?;
        accumulator.accumulate(&grads(1.)?)?;
        assert_eq!(flat(&accumulator)?, vec![1., -2., 3., 0.5, 4., -8.]);
        Ok(())
    }

    #[test]
    fn mismatched_gradients_are_rejected() -> Result<()> {
        let mut accumulator = accumulator()?;
        let mut wrong = grads(1.)?;
        wrong.pop();
        assert!(accumulator.accumulate(&wrong).is_err());
        Ok(())
    }
}
