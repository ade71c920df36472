// Purchase cycle execution
pub mod engine;
pub mod guard;

pub use engine::{CycleOutcome, CycleReport, ExecutionEngine};
pub use guard::DuplicateGuard;
