// Narrator Audio
// Command-line speech engines behind the narrator-core model traits

pub mod command;
pub mod engine;
mod utils;

pub use command::CommandModel;
pub use engine::{CommandEngineLoader, EngineConfig, EngineKind, EnginePreference};
