//! Convenience re-exports for common `llama-gguf` types.
//!
//! ```ignore
//! use llama_gguf::prelude::*;
//! ```
//!
//! Covers running prompts end to end: settings, the registry, models, the
//! llama-server engine and the response log. Stream parsing, retry and
//! download internals stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Conversation, Prompt, Response, Turn, json_schema_for};

// ── Models and prompts ──────────────────────────────────────────────
pub use crate::model::{BuiltPrompt, LlamaModel, PromptFormat};
pub use crate::options::Options;
pub use crate::prompt::{DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT, build_llama2_chat_prompt};

// ── Engine ──────────────────────────────────────────────────────────
pub use crate::engine::server::LlamaServerEngine;
pub use crate::engine::{CompletionFuture, CompletionRequest, InferenceEngine, TokenSink};

// ── Storage and settings ────────────────────────────────────────────
pub use crate::config::Settings;
pub use crate::history::ResponseLog;
pub use crate::registry::{ModelEntry, ModelRegistry};
