pub mod accumulator;
pub mod cancellation;
pub mod config;
pub mod coordinator;
pub mod env;
pub mod evaluation;
pub mod frame_stack;
pub mod hooks;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod parameters;
pub mod persistence;
pub mod rng;
pub mod rollout;
pub mod shared_store;
pub mod tensors;
pub mod utils;
pub mod worker;

pub use config::{A3CConfig, ConfigError, RewardClipping};
pub use coordinator::{Coordinator, CoordinatorOptions, TrainingReport, WorkerOutcome, WorkerStatus};
pub use env::{Environment, EnvironmentDescription, ObservationShape};
pub use model::ActorCriticModel;
pub use parameters::{ParameterSchema, ParameterSpec, ParameterVector, SchemaMismatch};
pub use shared_store::SharedParameterStore;
pub use worker::{ActorLearner, WorkerSummary};
