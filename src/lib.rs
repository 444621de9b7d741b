pub mod config;
pub mod update;

pub use config::UpdateConfig;
pub use update::{perform_update, Pipeline, StageFailure, UpdateError, UpdateState};
