//! Runnable models.
//!
//! A [`LlamaModel`] is a registered weights file plus the prompt strategy
//! it was trained on. [`LlamaModel::execute`] formats the prompt, runs it
//! through an [`InferenceEngine`] and returns a [`Response`] ready for the
//! response log.

use std::path::PathBuf;

use tracing::debug;

use crate::engine::InferenceEngine;
use crate::options::Options;
use crate::prompt::{DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT, build_llama2_chat_prompt};
use crate::{Conversation, Prompt, Response, generate_id};

/// How prompts are formatted for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptFormat {
    /// The prompt text is sent as-is. System prompts and history are not
    /// included.
    #[default]
    Plain,
    /// Llama 2 chat template, see [`crate::prompt`].
    Llama2Chat,
}

/// The text sent to the engine, and the fragments it was joined from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub text: String,
    /// Empty for [`PromptFormat::Plain`].
    pub fragments: Vec<String>,
}

impl BuiltPrompt {
    /// `{"prompt_bits": [...]}` for the response log, if there are fragments.
    pub fn prompt_json(&self) -> Option<serde_json::Value> {
        if self.fragments.is_empty() {
            None
        } else {
            Some(serde_json::json!({ "prompt_bits": self.fragments }))
        }
    }
}

/// A local GGUF model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlamaModel {
    pub model_id: String,
    pub path: PathBuf,
    pub format: PromptFormat,
    /// Replaces the built-in Llama 2 system prompt when set.
    pub default_system_prompt: Option<String>,
}

impl LlamaModel {
    pub fn new(model_id: impl Into<String>, path: impl Into<PathBuf>, format: PromptFormat) -> Self {
        Self {
            model_id: model_id.into(),
            path: path.into(),
            format,
            default_system_prompt: None,
        }
    }

    pub fn with_default_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.default_system_prompt = Some(system_prompt.into());
        self
    }

    /// Models always stream.
    pub fn can_stream(&self) -> bool {
        true
    }

    fn system_prompt_fallback(&self) -> &str {
        self.default_system_prompt
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT)
    }

    /// Format `prompt` (continuing `conversation`) for this model.
    pub fn build_prompt(&self, prompt: &Prompt, conversation: Option<&Conversation>) -> BuiltPrompt {
        match self.format {
            PromptFormat::Plain => BuiltPrompt {
                text: prompt.prompt.clone(),
                fragments: Vec::new(),
            },
            PromptFormat::Llama2Chat => {
                let fragments =
                    build_llama2_chat_prompt(prompt, conversation, self.system_prompt_fallback());
                BuiltPrompt {
                    text: fragments.concat(),
                    fragments,
                }
            }
        }
    }

    /// Run `prompt` through `engine`, passing each generated chunk to
    /// `on_token`. The returned response is not logged.
    pub async fn execute<F>(
        &self,
        prompt: &Prompt,
        conversation: Option<&Conversation>,
        options: &Options,
        engine: &dyn InferenceEngine,
        mut on_token: F,
    ) -> Result<Response, String>
    where
        F: FnMut(&str) + Send,
    {
        let built = self.build_prompt(prompt, conversation);
        let request = options.to_request(&self.path, built.text.as_str());
        debug!(
            "Executing {} via {} ({:?}, {} history turns)",
            self.model_id,
            engine.name(),
            self.format,
            conversation.map_or(0, Conversation::len)
        );

        let output = engine.complete(&request, &mut on_token).await?;

        Ok(Response {
            id: generate_id("r"),
            conversation_id: conversation
                .map(|c| c.id.clone())
                .unwrap_or_else(|| generate_id("cv")),
            model: self.model_id.clone(),
            prompt: prompt.prompt.clone(),
            system: prompt.system.clone().filter(|s| !s.is_empty()),
            prompt_json: built.prompt_json(),
            options: options.to_log_value(),
            response: output,
            datetime_utc: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Turn;
    use crate::engine::{CompletionFuture, CompletionRequest, TokenSink};
    use std::sync::Mutex;

    /// Engine that echoes fixed chunks and records what it was asked.
    struct FakeEngine {
        chunks: Vec<&'static str>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl FakeEngine {
        fn new(chunks: Vec<&'static str>) -> Self {
            Self {
                chunks,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl InferenceEngine for FakeEngine {
        fn name(&self) -> &str {
            "fake"
        }

        fn complete<'a>(
            &'a self,
            request: &'a CompletionRequest,
            on_token: TokenSink<'a>,
        ) -> CompletionFuture<'a> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(request.clone());
                let mut out = String::new();
                for chunk in self.chunks.iter().copied() {
                    on_token(chunk);
                    out.push_str(chunk);
                }
                Ok(out)
            })
        }
    }

    struct FailingEngine;

    impl InferenceEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn complete<'a>(
            &'a self,
            _request: &'a CompletionRequest,
            _on_token: TokenSink<'a>,
        ) -> CompletionFuture<'a> {
            Box::pin(async { Err("engine exploded".to_string()) })
        }
    }

    fn chat_model() -> LlamaModel {
        LlamaModel::new("llama-2-7b-chat", "/models/llama-2-7b-chat.gguf", PromptFormat::Llama2Chat)
    }

    #[test]
    fn plain_prompt_is_verbatim() {
        let model = LlamaModel::new("orca", "/m/orca.gguf", PromptFormat::Plain);
        let built = model.build_prompt(&Prompt::new("2+2=").with_system("ignored"), None);
        assert_eq!(built.text, "2+2=");
        assert!(built.fragments.is_empty());
        assert!(built.prompt_json().is_none());
    }

    #[test]
    fn chat_prompt_joins_fragments() {
        let built = chat_model().build_prompt(&Prompt::new("hi"), None);
        assert_eq!(built.text, built.fragments.concat());
        assert!(built.text.starts_with("<s>[INST] <<SYS>>\nYou are a helpful"));
        assert!(built.text.ends_with("hi [/INST] "));
        assert_eq!(
            built.prompt_json().unwrap()["prompt_bits"].as_array().unwrap().len(),
            3
        );
    }

    #[test]
    fn model_default_system_prompt_replaces_builtin() {
        let model = chat_model().with_default_system_prompt("Answer in French.");
        let built = model.build_prompt(&Prompt::new("hi"), None);
        assert_eq!(built.fragments[1], "<<SYS>>\nAnswer in French.\n<</SYS>>\n\n");

        let blank = chat_model().with_default_system_prompt("");
        let built = blank.build_prompt(&Prompt::new("hi"), None);
        assert!(built.fragments[1].contains("You are a helpful"));
    }

    #[tokio::test]
    async fn execute_streams_and_builds_response() {
        let engine = FakeEngine::new(vec!["Hel", "lo"]);
        let mut streamed = Vec::new();
        let options = Options {
            max_tokens: Some(16),
            ..Default::default()
        };
        let response = chat_model()
            .execute(&Prompt::new("hi"), None, &options, &engine, |t| {
                streamed.push(t.to_string())
            })
            .await
            .unwrap();

        assert_eq!(streamed, vec!["Hel", "lo"]);
        assert_eq!(response.response, "Hello");
        assert_eq!(response.model, "llama-2-7b-chat");
        assert!(response.conversation_id.starts_with("cv-"));
        assert_eq!(response.options, serde_json::json!({"max_tokens": 16}));
        assert_eq!(response.prompt_bits().unwrap().len(), 3);

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen[0].n_predict, Some(16));
        assert_eq!(seen[0].model_path, PathBuf::from("/models/llama-2-7b-chat.gguf"));
        assert_eq!(seen[0].prompt, response.prompt_bits().unwrap().concat());
    }

    #[tokio::test]
    async fn execute_continues_conversation() {
        let engine = FakeEngine::new(vec!["ok"]);
        let conversation = Conversation {
            id: "cv-existing".into(),
            model_id: "llama-2-7b-chat".into(),
            turns: vec![Turn {
                prompt: "first".into(),
                system: Some("Be terse.".into()),
                response: "one".into(),
            }],
        };
        let response = chat_model()
            .execute(&Prompt::new("second"), Some(&conversation), &Options::default(), &engine, |_| {})
            .await
            .unwrap();

        assert_eq!(response.conversation_id, "cv-existing");
        assert!(response.system.is_none());
        let bits = response.prompt_bits().unwrap();
        assert_eq!(bits[1], "<<SYS>>\nBe terse.\n<</SYS>>\n\n");
        assert_eq!(bits.last().unwrap(), "second [/INST] ");
    }

    #[tokio::test]
    async fn engine_errors_propagate() {
        let err = chat_model()
            .execute(&Prompt::new("hi"), None, &Options::default(), &FailingEngine, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, "engine exploded");
    }

    #[test]
    fn models_stream() {
        assert!(chat_model().can_stream());
    }
}
