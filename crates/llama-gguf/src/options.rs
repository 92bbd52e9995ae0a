//! Per-prompt model options.
//!
//! [`Options`] is the option schema exposed to users (`-o key value` on the
//! CLI). Raw pairs are coerced to JSON, validated against the schema
//! generated by `schemars`, and only then deserialized, so error messages
//! name the offending key. [`Options::to_request`] maps validated options
//! onto the engine's call arguments.

use crate::engine::CompletionRequest;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Context window passed to the engine when none is given.
pub const DEFAULT_N_CTX: u32 = 4000;

/// Options accepted by every llama.cpp model.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Show llama.cpp's own output (model loading, timings) instead of
    /// discarding it.
    #[serde(default)]
    pub verbose: bool,
    /// Context window size in tokens.
    #[serde(default = "default_n_ctx")]
    #[schemars(range(min = 1))]
    pub n_ctx: u32,
    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0.0, max = 1.0))]
    pub top_p: Option<f32>,
    /// Top-k sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Penalty applied to repeated tokens (1.0 = none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0.0))]
    pub repeat_penalty: Option<f32>,
    /// RNG seed; -1 picks a random seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

fn default_n_ctx() -> u32 {
    DEFAULT_N_CTX
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: false,
            n_ctx: DEFAULT_N_CTX,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            repeat_penalty: None,
            seed: None,
            stop: None,
        }
    }
}

impl Options {
    /// JSON schema for the options object.
    pub fn schema() -> serde_json::Value {
        crate::json_schema_for::<Self>()
    }

    /// Parse `key value` pairs as given on the command line.
    ///
    /// Values are read as JSON when they parse (`true`, `0.7`, `["a"]`) and
    /// as plain strings otherwise. A repeated key keeps its last value.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, String> {
        let mut object = serde_json::Map::new();
        for (key, raw) in pairs {
            object.insert(key.clone(), coerce_value(raw));
        }
        Self::from_value(serde_json::Value::Object(object))
    }

    /// Validate a JSON options object against the schema and deserialize it.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        let schema = Self::schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| format!("invalid options schema: {e}"))?;

        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| {
                let path = e.instance_path().to_string();
                if path.is_empty() {
                    format!("  - {e}")
                } else {
                    format!("  - {path}: {e}")
                }
            })
            .collect();
        if !errors.is_empty() {
            return Err(format!("invalid options:\n{}", errors.join("\n")));
        }

        serde_json::from_value(value).map_err(|e| format!("invalid options: {e}"))
    }

    /// Options as stored in the response log. Defaults are omitted.
    pub fn to_log_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            if !self.verbose {
                obj.remove("verbose");
            }
            if self.n_ctx == DEFAULT_N_CTX {
                obj.remove("n_ctx");
            }
        }
        value
    }

    /// Map these options onto an engine call.
    pub fn to_request(&self, model_path: &Path, prompt: impl Into<String>) -> CompletionRequest {
        CompletionRequest {
            model_path: model_path.to_path_buf(),
            prompt: prompt.into(),
            n_ctx: self.n_ctx,
            verbose: self.verbose,
            stream: true,
            n_predict: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repeat_penalty: self.repeat_penalty,
            seed: self.seed,
            stop: self.stop.clone().unwrap_or_default(),
        }
    }
}

/// Interpret a raw CLI value as JSON, falling back to a string.
fn coerce_value(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        // Bare objects are never option values; keep them as text.
        Ok(serde_json::Value::Object(_)) | Err(_) => serde_json::Value::String(raw.to_string()),
        Ok(v) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_pairs_give_defaults() {
        let options = Options::from_pairs(&[]).unwrap();
        assert_eq!(options, Options::default());
        assert_eq!(options.n_ctx, 4000);
        assert!(!options.verbose);
    }

    #[test]
    fn pairs_are_coerced() {
        let options = Options::from_pairs(&pairs(&[
            ("verbose", "true"),
            ("temperature", "0.25"),
            ("max_tokens", "64"),
            ("stop", r#"["</s>", "User:"]"#),
        ]))
        .unwrap();
        assert!(options.verbose);
        assert_eq!(options.temperature, Some(0.25));
        assert_eq!(options.max_tokens, Some(64));
        assert_eq!(
            options.stop,
            Some(vec!["</s>".to_string(), "User:".to_string()])
        );
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = Options::from_pairs(&pairs(&[("bogus", "1")])).unwrap_err();
        assert!(err.contains("invalid options"), "{err}");
        assert!(err.contains("bogus"), "{err}");
    }

    #[test]
    fn wrong_type_names_the_key() {
        let err = Options::from_pairs(&pairs(&[("temperature", "hot")])).unwrap_err();
        assert!(err.contains("/temperature"), "{err}");
    }

    #[test]
    fn out_of_range_is_rejected() {
        let err = Options::from_pairs(&pairs(&[("top_p", "1.5")])).unwrap_err();
        assert!(err.contains("/top_p"), "{err}");
    }

    #[test]
    fn last_duplicate_wins() {
        let options =
            Options::from_pairs(&pairs(&[("max_tokens", "10"), ("max_tokens", "20")])).unwrap();
        assert_eq!(options.max_tokens, Some(20));
    }

    #[test]
    fn schema_lists_every_option() {
        let schema = Options::schema();
        let props = schema["properties"].as_object().unwrap();
        for key in [
            "verbose",
            "n_ctx",
            "max_tokens",
            "temperature",
            "top_p",
            "top_k",
            "repeat_penalty",
            "seed",
            "stop",
        ] {
            assert!(props.contains_key(key), "missing {key}");
        }
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn to_request_maps_fields() {
        let options = Options {
            verbose: true,
            max_tokens: Some(32),
            temperature: Some(0.1),
            stop: Some(vec!["\n".into()]),
            ..Default::default()
        };
        let req = options.to_request(Path::new("/models/m.gguf"), "text");
        assert_eq!(req.model_path, Path::new("/models/m.gguf"));
        assert_eq!(req.prompt, "text");
        assert_eq!(req.n_ctx, 4000);
        assert!(req.verbose);
        assert!(req.stream);
        assert_eq!(req.n_predict, Some(32));
        assert_eq!(req.temperature, Some(0.1));
        assert_eq!(req.stop, vec!["\n".to_string()]);
    }

    #[test]
    fn log_value_omits_defaults() {
        assert_eq!(Options::default().to_log_value(), serde_json::json!({}));
        let options = Options {
            temperature: Some(0.5),
            ..Default::default()
        };
        assert_eq!(options.to_log_value(), serde_json::json!({"temperature": 0.5}));
    }
}
