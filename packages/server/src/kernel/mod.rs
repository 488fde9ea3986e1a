pub mod assignment;
pub mod events;
pub mod generator_engine;
pub mod recovery;
pub mod security;

pub use assignment::AssignmentEngine;
pub use events::{EventHub, ProcessEvent, WaitOutcome};
pub use generator_engine::GeneratorWorker;
pub use recovery::RecoveryWorker;
