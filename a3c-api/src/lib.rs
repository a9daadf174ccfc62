// builders + hooks + checkpoint helpers on top of a3c-core
pub mod builders;
pub mod hooks;
pub mod utils;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use builders::{
    a3c::{A3CBuilder, EvaluationSettings},
    network::NetworkBuilder,
    optimizer::OptimizerBuilder,
};
pub use hooks::periodic_evaluation::PeriodicEvaluationHook;
