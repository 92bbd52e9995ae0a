//! Inference engine seam.
//!
//! Models never talk to llama.cpp directly. They build a
//! [`CompletionRequest`] and hand it to an [`InferenceEngine`], which streams
//! generated text back through a callback:
//!
//! - [`server`]: [`LlamaServerEngine`](server::LlamaServerEngine), which
//!   spawns (or attaches to) a llama.cpp `llama-server` and streams its
//!   `/completion` endpoint.
//! - [`streaming`]: SSE parsing for the `/completion` stream.

pub mod server;
pub mod streaming;

use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Boxed future returned by [`InferenceEngine::complete`]. Resolves to the
/// full generated text.
pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// Callback receiving each generated text chunk, in order.
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Arguments for one completion call.
///
/// Serializes to the body of llama-server's `POST /completion`; the model
/// path, context size and verbosity are process-level settings and are
/// skipped.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    #[serde(skip)]
    pub model_path: PathBuf,
    pub prompt: String,
    #[serde(skip)]
    pub n_ctx: u32,
    #[serde(skip)]
    pub verbose: bool,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Something that can turn a prompt into streamed text.
pub trait InferenceEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run `request`, calling `on_token` for every generated chunk, and
    /// return the concatenated output.
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
        on_token: TokenSink<'a>,
    ) -> CompletionFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_skips_process_settings() {
        let req = CompletionRequest {
            model_path: PathBuf::from("/m.gguf"),
            prompt: "hi".into(),
            n_ctx: 4000,
            verbose: false,
            stream: true,
            n_predict: Some(8),
            temperature: None,
            top_p: None,
            top_k: None,
            repeat_penalty: None,
            seed: None,
            stop: vec![],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"prompt": "hi", "stream": true, "n_predict": 8})
        );
    }
}
