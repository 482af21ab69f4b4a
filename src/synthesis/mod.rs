//! Content synthesis: LLM-backed generation and LLM-as-judge evaluation.

pub mod evaluator;
pub mod generator;
pub mod model;

pub use evaluator::{ContentEvaluator, EvalResult};
pub use generator::{ContentGenerator, GeneratedContent};
pub use model::{AnthropicModel, ChatModel, MockModel};
