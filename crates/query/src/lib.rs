//! Question answering over indexed chunks.

pub mod generator;
pub mod llm;
pub mod retriever;

pub use generator::{GenerationError, Generator, NO_CONTEXT_INSTRUCTION, build_prompt};
pub use llm::{QueryLLM, SamplingOptions};
pub use retriever::{RetrieveError, Retriever};
