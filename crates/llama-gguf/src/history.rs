//! Append-only response log.
//!
//! Every response is written as one JSON line to `<home>/logs.jsonl`,
//! including the exact prompt fragments sent to the engine. Conversations
//! are rebuilt by replaying the lines that share a conversation ID.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Conversation, Response};

/// File name of the log inside the data directory.
pub const LOG_FILE: &str = "logs.jsonl";

/// JSONL log of responses.
#[derive(Debug, Clone)]
pub struct ResponseLog {
    path: PathBuf,
}

impl ResponseLog {
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            path: home.as_ref().join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one response.
    pub fn append(&self, response: &Response) -> Result<(), String> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
        }
        let mut line = serde_json::to_string(response)
            .map_err(|e| format!("failed to serialize response: {e}"))?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| format!("failed to open {}: {e}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| format!("failed to write {}: {e}", self.path.display()))?;

        debug!("Logged response {} to {}", response.id, self.path.display());
        Ok(())
    }

    /// Every readable response, oldest first. Malformed lines are skipped.
    pub fn responses(&self) -> Result<Vec<Response>, String> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("failed to read {}: {e}", self.path.display()))?;

        let mut responses = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Response>(line) {
                Ok(r) => responses.push(r),
                Err(e) => warn!(
                    "Skipping malformed log line {} in {}: {e}",
                    i + 1,
                    self.path.display()
                ),
            }
        }
        Ok(responses)
    }

    /// Rebuild a conversation from its logged responses. `None` when no
    /// response carries `conversation_id`.
    pub fn load_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, String> {
        let responses: Vec<Response> = self
            .responses()?
            .into_iter()
            .filter(|r| r.conversation_id == conversation_id)
            .collect();
        let Some(first) = responses.first() else {
            return Ok(None);
        };
        Ok(Some(Conversation {
            id: conversation_id.to_string(),
            model_id: first.model.clone(),
            turns: responses.iter().map(Response::to_turn).collect(),
        }))
    }

    /// Conversation ID of the most recently logged response.
    pub fn latest_conversation_id(&self) -> Result<Option<String>, String> {
        Ok(self.responses()?.pop().map(|r| r.conversation_id))
    }
}
