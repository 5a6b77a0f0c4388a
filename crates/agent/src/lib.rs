//! Conversation runtime for the showroom assistant.
//!
//! This crate owns everything that happens inside a single turn:
//! - Slot extraction from free text (`extraction`), backed by an LLM (`llm`)
//!   or a deterministic keyword matcher
//! - Two-tier memory hydration and persistence (`memory`)
//! - Per-session serialisation of turns (`locks`)
//! - Reply composition when the extractor offers none (`reply`)
//! - The turn controller tying these together (`runtime`)
//!
//! # Safety Principle
//!
//! The extractor is strictly advisory. It never writes session state; every
//! value it proposes goes through `showroom_core::merge::StateMerger`, and stage
//! movement is decided only by the funnel engine.

pub mod extraction;
pub mod llm;
pub mod locks;
pub mod memory;
pub mod reply;
pub mod runtime;

pub use extraction::{
    ExtractionAdapter, ExtractionError, ExtractionRequest, KeywordSlotExtractor,
    LlmSlotExtractor, SlotExtractor,
};
pub use llm::{HttpLlmClient, LlmClient, LlmError, LlmMessage, LlmRequest};
pub use memory::{HydrationSource, MemoryReconciler};
pub use runtime::{TurnController, TurnRequest, TurnResponse, TurnSettings};
