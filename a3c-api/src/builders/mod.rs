pub mod a3c;
pub mod network;
pub mod optimizer;
