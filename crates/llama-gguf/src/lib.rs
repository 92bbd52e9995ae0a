//! Run local GGML/GGUF language models through llama.cpp.
//!
//! `llama-gguf` keeps a small on-disk registry of model files and aliases,
//! downloads model weights over HTTP, formats prompts (including the Llama 2
//! chat template) and streams tokens back from a llama.cpp
//! [`llama-server`](engine::server::LlamaServerEngine) process.
//!
//! # Getting started
//!
//! ```ignore
//! use llama_gguf::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let settings = Settings::from_env();
//!     let registry = ModelRegistry::new(&settings.home);
//!
//!     let model = registry
//!         .resolve("llama2")?
//!         .ok_or_else(|| "unknown model: llama2".to_string())?;
//!
//!     let engine = LlamaServerEngine::new(&settings);
//!     let response = model
//!         .execute(&Prompt::new("Name three rivers."), None, &Options::default(), &engine, |t| {
//!             print!("{t}")
//!         })
//!         .await?;
//!
//!     ResponseLog::new(&settings.home).append(&response)?;
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Chat prompt format:** [`prompt::build_llama2_chat_prompt`] turns a
//!   [`Conversation`] plus a new [`Prompt`] into the exact fragments sent to
//!   the engine.
//! - **Models:** [`LlamaModel`](model::LlamaModel) pairs a weights file with a
//!   [`PromptFormat`](model::PromptFormat) and runs prompts through an
//!   [`InferenceEngine`](engine::InferenceEngine).
//! - **Options:** [`Options`](options::Options) is the typed option schema;
//!   it validates `-o key value` pairs and maps them to engine call args.
//! - **Registry:** [`ModelRegistry`](registry::ModelRegistry) reads and writes
//!   `models.json` and resolves names and aliases.
//! - **Downloads:** [`download::download_model`] streams a `.gguf` file into
//!   the models directory and registers it.
//! - **Logging responses:** [`ResponseLog`](history::ResponseLog) appends every
//!   response, with its prompt fragments, to `logs.jsonl` and reloads
//!   conversations from it.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`prompt`] | Llama 2 chat prompt builder |
//! | [`model`] | [`LlamaModel`](model::LlamaModel), prompt strategies, execution |
//! | [`options`] | Option schema, validation, engine call mapping |
//! | [`engine`] | [`InferenceEngine`](engine::InferenceEngine) trait, llama-server client, SSE parsing |
//! | [`registry`] | `models.json` repository |
//! | [`download`] | HTTP downloads with progress |
//! | [`history`] | JSONL response log |
//! | [`config`] | [`Settings`](config::Settings) from env and flags |
//! | [`logging`] | tracing layer for stderr output |
//! | [`retry`] | Backoff for transient HTTP failures |

pub mod config;
pub mod download;
pub mod engine;
pub mod history;
pub mod logging;
pub mod model;
pub mod options;
pub mod prelude;
pub mod prompt;
pub mod registry;
pub mod retry;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use llama_gguf::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Sampling {
///     temperature: f32,
///     #[serde(default)]
///     seed: Option<i64>,
/// }
///
/// let schema = json_schema_for::<Sampling>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"temperature".into()));
/// ```
pub fn json_schema_for<T: schemars::JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Prompt types ───────────────────────────────────────────────────

/// A new user prompt, with an optional system prompt override.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Prompt {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl Prompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
        }
    }

    /// Set the system prompt override.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// One completed exchange in a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub response: String,
}

/// Prior turns with one model, oldest first.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub model_id: String,
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Start an empty conversation with a fresh ID.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            id: generate_id("cv"),
            model_id: model_id.into(),
            turns: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

// ── Response ───────────────────────────────────────────────────────

/// A completed model response, as stored in the response log.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Response {
    pub id: String,
    pub conversation_id: String,
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Exact prompt structure sent to the engine, e.g.
    /// `{"prompt_bits": [...]}` for chat-formatted models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_json: Option<serde_json::Value>,
    #[serde(default)]
    pub options: serde_json::Value,
    pub response: String,
    pub datetime_utc: chrono::DateTime<chrono::Utc>,
}

impl Response {
    /// The turn this response adds to its conversation.
    pub fn to_turn(&self) -> Turn {
        Turn {
            prompt: self.prompt.clone(),
            system: self.system.clone(),
            response: self.response.clone(),
        }
    }

    /// The prompt fragments recorded for this response, if any.
    pub fn prompt_bits(&self) -> Option<Vec<String>> {
        let bits = self.prompt_json.as_ref()?.get("prompt_bits")?.as_array()?;
        bits.iter()
            .map(|b| b.as_str().map(str::to_string))
            .collect()
    }
}

/// Generate a unique, roughly time-ordered ID with the given prefix.
pub fn generate_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates IDs generated within the same clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{ts:x}-{count:04x}")
}
