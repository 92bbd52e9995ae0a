//! Runtime settings with environment overrides.
//!
//! [`Settings`] holds everything the CLI and library need to locate files
//! and reach the inference engine. [`Settings::from_env`] layers environment
//! variables over the defaults; the CLI layers its flags over that.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the data directory (registry, models, response log).
pub const HOME_ENV: &str = "LLAMA_GGUF_HOME";
/// Overrides the `llama-server` executable.
pub const SERVER_BIN_ENV: &str = "LLAMA_SERVER_BIN";
/// Attach to an already-running `llama-server` instead of spawning one.
pub const SERVER_URL_ENV: &str = "LLAMA_SERVER_URL";
/// Replaces the built-in Llama 2 chat system prompt.
pub const SYSTEM_PROMPT_ENV: &str = "LLAMA_GGUF_SYSTEM_PROMPT";

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Data directory. Default: `<platform data dir>/llama-gguf`.
    pub home: PathBuf,
    /// `llama-server` executable spawned per prompt. Default: `"llama-server"`.
    pub server_binary: PathBuf,
    /// Base URL of a running `llama-server`. When set, no process is spawned.
    pub server_url: Option<String>,
    /// System prompt for chat models that carry none. `None` uses
    /// [`DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT`](crate::prompt::DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT).
    pub default_system_prompt: Option<String>,
    /// How long to wait for a spawned server to report healthy. Default: 120s.
    pub startup_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: default_home(),
            server_binary: PathBuf::from("llama-server"),
            server_url: None,
            default_system_prompt: None,
            startup_timeout: Duration::from_secs(120),
        }
    }
}

impl Settings {
    /// Defaults overridden by `LLAMA_GGUF_*` / `LLAMA_SERVER_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut settings = Self::default();
        if let Some(home) = get(HOME_ENV) {
            settings.home = PathBuf::from(home);
        }
        if let Some(bin) = get(SERVER_BIN_ENV) {
            settings.server_binary = PathBuf::from(bin);
        }
        settings.server_url = get(SERVER_URL_ENV);
        settings.default_system_prompt = get(SYSTEM_PROMPT_ENV);
        settings
    }

    pub fn with_home(mut self, home: impl AsRef<Path>) -> Self {
        self.home = home.as_ref().to_path_buf();
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_server_binary(mut self, binary: impl AsRef<Path>) -> Self {
        self.server_binary = binary.as_ref().to_path_buf();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

fn default_home() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llama-gguf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert!(settings.home.ends_with("llama-gguf"));
        assert_eq!(settings.server_binary, PathBuf::from("llama-server"));
        assert!(settings.server_url.is_none());
        assert_eq!(settings.startup_timeout, Duration::from_secs(120));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (HOME_ENV, "/tmp/llama-home"),
            (SERVER_BIN_ENV, "/opt/llama/bin/llama-server"),
            (SERVER_URL_ENV, "http://127.0.0.1:8080"),
            (SYSTEM_PROMPT_ENV, "Be brief."),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(settings.home, PathBuf::from("/tmp/llama-home"));
        assert_eq!(
            settings.server_binary,
            PathBuf::from("/opt/llama/bin/llama-server")
        );
        assert_eq!(settings.server_url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(settings.default_system_prompt.as_deref(), Some("Be brief."));
    }

    #[test]
    fn empty_variables_are_ignored() {
        let settings = Settings::from_lookup(|_| Some(String::new()));
        assert!(settings.server_url.is_none());
        assert!(settings.default_system_prompt.is_none());
        assert_eq!(settings.server_binary, PathBuf::from("llama-server"));
    }

    #[test]
    fn builders_override_fields() {
        let settings = Settings::default()
            .with_home("/data")
            .with_server_url("http://localhost:9000")
            .with_startup_timeout(Duration::from_secs(5));
        assert_eq!(settings.home, PathBuf::from("/data"));
        assert_eq!(settings.server_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(settings.startup_timeout, Duration::from_secs(5));
    }
}
