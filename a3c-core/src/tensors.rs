//! Newtypes that keep the scalar losses and per-step quantities of a segment apart.

use candle_core::Tensor;
use derive_more::{Deref, Display, From};

/// `R - V(s)` per step, `[batch, 1]`.
#[derive(Debug, Display, Deref, From)]
pub struct Advantages(pub Tensor);

/// Scalar actor loss including the entropy term.
#[derive(Debug, Display, Deref, From)]
pub struct PolicyLoss(pub Tensor);

/// Scalar critic loss, the summed squared advantages.
#[derive(Debug, Display, Deref, From)]
pub struct ValueLoss(pub Tensor);

/// The scalar that gets differentiated.
#[derive(Debug, Display, Deref, From)]
pub struct TotalLoss(pub Tensor);
