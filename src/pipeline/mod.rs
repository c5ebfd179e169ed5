//! Email command pipeline.
//!
//! Every inbound request flows through:
//! 1. `normalizer::normalize_content()`: markup removed, whitespace collapsed
//! 2. `IntentClassifier::classify()`: LLM output parsed into a closed `Action`
//! 3. `ActionExecutor::execute()`: library state transition + reply text
//! 4. `EmailPipeline`: sends the one reply and marks the message read

pub mod action;
pub mod classifier;
pub mod executor;
pub mod normalizer;
pub mod processor;

pub use action::{Action, ActionKind};
pub use classifier::IntentClassifier;
pub use executor::{ActionExecutor, Reply, ReplyStatus};
pub use processor::{BatchReport, EmailPipeline, ProcessOutcome, ProcessStatus};
