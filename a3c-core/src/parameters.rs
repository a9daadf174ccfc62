use candle_core::{DType, Device, Shape, Tensor, Var};
use derive_more::{Deref, DerefMut, Display, Error, From, IntoIterator};

#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum SchemaMismatch {
    #[display("expected {expected} parameter tensors, got {actual}")]
    Count { expected: usize, actual: usize },
    #[display("parameter `{name}` should have shape {expected:?}, got {actual:?}")]
    Shape {
        name: String,
        expected: Shape,
        actual: Shape,
    },
    #[display("parameter `{name}` should have dtype {expected:?}, got {actual:?}")]
    DType {
        name: String,
        expected: DType,
        actual: DType,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            dtype,
        }
    }
}

/// The ordered catalogue of parameter tensors a network model exposes. Local replicas, the
/// gradient accumulators and the shared store are all laid out after the same schema.
#[derive(Debug, Clone, Default, PartialEq, Deref, IntoIterator)]
pub struct ParameterSchema(#[into_iterator(ref)] Vec<ParameterSpec>);

impl ParameterSchema {
    pub fn new(specs: Vec<ParameterSpec>) -> Self {
        Self(specs)
    }

    pub fn push(&mut self, spec: ParameterSpec) -> usize {
        self.0.push(spec);
        self.0.len() - 1
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|spec| spec.name.as_str())
    }

    pub fn validate(&self, tensors: &[Tensor]) -> Result<(), SchemaMismatch> {
        if tensors.len() != self.0.len() {
            return Err(SchemaMismatch::Count {
                expected: self.0.len(),
                actual: tensors.len(),
            });
        }
        for (spec, tensor) in self.0.iter().zip(tensors) {
            if tensor.shape() != &spec.shape {
                return Err(SchemaMismatch::Shape {
                    name: spec.name.clone(),
                    expected: spec.shape.clone(),
                    actual: tensor.shape().clone(),
                });
            }
            if tensor.dtype() != spec.dtype {
                return Err(SchemaMismatch::DType {
                    name: spec.name.clone(),
                    expected: spec.dtype,
                    actual: tensor.dtype(),
                });
            }
        }
        Ok(())
    }

    /// One zero filled tensor per parameter.
    pub fn zeros(&self, device: &Device) -> candle_core::Result<Vec<Tensor>> {
        self.0
            .iter()
            .map(|spec| Tensor::zeros(spec.shape.clone(), spec.dtype, device))
            .collect()
    }
}

/// An ordered set of parameter tensors laid out after a [`ParameterSchema`].
#[derive(Debug, Clone, Default, Deref, DerefMut, From, IntoIterator)]
pub struct ParameterVector(#[into_iterator(owned, ref)] Vec<Tensor>);

impl ParameterVector {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self(tensors)
    }

    pub fn into_inner(self) -> Vec<Tensor> {
        self.0
    }

    /// Copies every tensor into a fresh variable. Gradients can be taken with respect to the
    /// returned variables and they do not share storage with `self`.
    pub fn to_vars(&self) -> candle_core::Result<Vec<Var>> {
        self.0.iter().map(Var::from_tensor).collect()
    }

    /// Largest absolute element-wise difference to `other`, assuming the same layout.
    pub fn max_abs_diff(&self, other: &ParameterVector) -> candle_core::Result<f32> {
        let mut max = 0f32;
        for (lhs, rhs) in self.0.iter().zip(other.0.iter()) {
            let diff = lhs
                .sub(rhs)?
                .abs()?
                .flatten_all()?
                .max(0)?
                .to_scalar::<f32>()?;
            max = max.max(diff);
        }
        Ok(max)
    }
}
