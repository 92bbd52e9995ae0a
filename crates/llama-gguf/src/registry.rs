//! On-disk model registry.
//!
//! Registered models live in `models.json` under the data directory:
//!
//! ```json
//! {
//!   "llama-2-7b-chat.Q6_K": {
//!     "path": "/home/me/.local/share/llama-gguf/models/llama-2-7b-chat.Q6_K.gguf",
//!     "aliases": ["llama2-chat"],
//!     "is_llama2_chat": true
//!   }
//! }
//! ```
//!
//! [`ModelRegistry`] is a repository over that file: callers load, change
//! and save explicitly; nothing is cached between calls.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{LlamaModel, PromptFormat};

/// File name of the registry inside the data directory.
pub const MODELS_FILE: &str = "models.json";
/// Directory (inside the data directory) that downloads are written to.
pub const MODELS_DIR: &str = "models";

/// One registered model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    /// Absolute path to the weights file.
    pub path: String,
    /// Extra names the model can be selected by.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Format prompts with the Llama 2 chat template.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_llama2_chat: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl ModelEntry {
    /// Build the runnable model for this entry.
    pub fn to_model(&self, model_id: &str) -> LlamaModel {
        let format = if self.is_llama2_chat {
            PromptFormat::Llama2Chat
        } else {
            PromptFormat::Plain
        };
        LlamaModel::new(model_id, &self.path, format)
    }
}

/// Contents of `models.json`: model ID → entry.
pub type ModelsFile = BTreeMap<String, ModelEntry>;

/// Repository over `models.json` and the models directory.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    home: PathBuf,
}

impl ModelRegistry {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Path to `models.json`. Does not touch the filesystem.
    pub fn models_file(&self) -> PathBuf {
        self.home.join(MODELS_FILE)
    }

    /// Path to the models directory. Does not touch the filesystem.
    pub fn models_dir(&self) -> PathBuf {
        self.home.join(MODELS_DIR)
    }

    /// Create the data directory if needed.
    pub fn ensure_home(&self) -> Result<&Path, String> {
        std::fs::create_dir_all(&self.home)
            .map_err(|e| format!("failed to create {}: {e}", self.home.display()))?;
        Ok(&self.home)
    }

    /// Create the models directory if needed and return it.
    pub fn ensure_models_dir(&self) -> Result<PathBuf, String> {
        let dir = self.models_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
        Ok(dir)
    }

    /// Create `models.json` as `{}` if needed and return its path.
    pub fn ensure_models_file(&self) -> Result<PathBuf, String> {
        self.ensure_home()?;
        let path = self.models_file();
        if !path.exists() {
            std::fs::write(&path, "{}")
                .map_err(|e| format!("failed to create {}: {e}", path.display()))?;
        }
        Ok(path)
    }

    /// Read the registry. A missing file reads as empty.
    pub fn load(&self) -> Result<ModelsFile, String> {
        let path = self.models_file();
        if !path.exists() {
            return Ok(ModelsFile::new());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    /// Write the registry atomically (temp file, then rename).
    pub fn save(&self, models: &ModelsFile) -> Result<(), String> {
        self.ensure_home()?;
        let final_path = self.models_file();
        let tmp_path = self.home.join(format!(".{MODELS_FILE}.tmp"));

        let json = serde_json::to_string_pretty(models)
            .map_err(|e| format!("failed to serialize models: {e}"))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("failed to write {}: {e}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| format!("failed to replace {}: {e}", final_path.display()))?;

        debug!("Saved {} model(s) to {}", models.len(), final_path.display());
        Ok(())
    }

    /// Register a weights file already on disk. The model ID is the file
    /// stem; an existing entry with that ID is replaced.
    pub fn add_model(
        &self,
        path: impl AsRef<Path>,
        aliases: &[String],
        llama2_chat: bool,
    ) -> Result<String, String> {
        let path = path.as_ref();
        if path.is_dir() {
            return Err(format!("{} is a directory", path.display()));
        }
        let resolved = std::fs::canonicalize(path)
            .map_err(|e| format!("cannot register {}: {e}", path.display()))?;
        let stored_path = resolved
            .to_str()
            .ok_or_else(|| format!("{} is not valid UTF-8", resolved.display()))?
            .to_string();
        let model_id = resolved
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| format!("cannot derive a model ID from {}", resolved.display()))?;

        let mut models = self.load()?;
        models.insert(
            model_id.clone(),
            ModelEntry {
                path: stored_path,
                aliases: aliases.to_vec(),
                is_llama2_chat: llama2_chat,
            },
        );
        self.save(&models)?;
        debug!("Registered {model_id} -> {}", resolved.display());
        Ok(model_id)
    }

    /// Remove a model by ID. Returns whether it was registered. The weights
    /// file is left in place.
    pub fn remove_model(&self, model_id: &str) -> Result<bool, String> {
        let mut models = self.load()?;
        if models.remove(model_id).is_none() {
            return Ok(false);
        }
        self.save(&models)?;
        Ok(true)
    }

    /// Hand every registered model, with its aliases, to `register`.
    /// Nothing happens when `models.json` does not exist.
    pub fn register_models(
        &self,
        mut register: impl FnMut(LlamaModel, &[String]),
    ) -> Result<(), String> {
        if !self.models_file().exists() {
            return Ok(());
        }
        for (model_id, entry) in self.load()? {
            register(entry.to_model(&model_id), &entry.aliases);
        }
        Ok(())
    }

    /// Find a model by ID, then by alias.
    pub fn resolve(&self, name: &str) -> Result<Option<LlamaModel>, String> {
        let models = self.load()?;
        if let Some(entry) = models.get(name) {
            return Ok(Some(entry.to_model(name)));
        }
        Ok(models
            .iter()
            .find(|(_, entry)| entry.aliases.iter().any(|a| a == name))
            .map(|(id, entry)| entry.to_model(id)))
    }
}
