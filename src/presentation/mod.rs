pub mod engine;
pub mod views;
