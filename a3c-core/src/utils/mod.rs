pub mod clip_grad;
pub mod returns;
pub mod trajectory;
