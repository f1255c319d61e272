//! The chat pipeline and its composers: PII masking policy, intent
//! classification and routing, prompt assembly, answer guarding, the
//! staged orchestrators (sync and streaming), personalisation facts,
//! and the FAQ/quiz/script/gap generators.

pub mod error;
pub mod generate;
pub mod guard;
pub mod intent;
pub mod mask;
pub mod orchestrator;
pub mod personalize;
pub mod prompt;
pub mod stream;

pub use error::{ChatError, Result};
pub use orchestrator::ChatPipeline;
