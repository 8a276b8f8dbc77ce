//! Evaluation pipeline and the per-question store of its results.

mod pipeline;
mod result;
mod store;

pub use pipeline::{EvaluationPipeline, PipelineError};
pub use result::{EvaluationResult, ReasonCode, SubScores};
pub use store::{EvaluationStore, SlotState};
