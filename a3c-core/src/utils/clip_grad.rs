use candle_core::{Result, Tensor};

/// Clamps every gradient element into `[-bound, bound]`.
pub fn clip_by_value(grads: &[Tensor], bound: f32) -> Result<Vec<Tensor>> {
    grads
        .iter()
        .map(|grad| grad.clamp(-bound, bound).map(|clipped| clipped.detach()))
        .collect()
}
