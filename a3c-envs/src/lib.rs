pub mod catch;

pub use catch::{Catch, CatchAction, CatchConfig};
