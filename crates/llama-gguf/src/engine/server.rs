//! llama.cpp `llama-server` engine.
//!
//! Two modes:
//!
//! - **Spawn** (default): each completion starts `llama-server` on a free
//!   loopback port with the request's model file and context size, waits for
//!   `GET /health` to return 200, streams the completion and kills the
//!   process. Unless the request is `verbose`, the server's stdout and stderr
//!   go to the null device so model-loading chatter never mixes with output.
//! - **Attach**: when a base URL is configured, requests go straight to that
//!   server and the model path is ignored (the server already has a model
//!   loaded).

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::streaming::{SseDecoder, StreamEvent};
use super::{CompletionFuture, CompletionRequest, InferenceEngine, TokenSink};
use crate::config::Settings;

/// Interval between `/health` checks while a spawned server loads its model.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Engine backed by llama.cpp's HTTP server.
pub struct LlamaServerEngine {
    client: reqwest::Client,
    binary: PathBuf,
    server_url: Option<String>,
    startup_timeout: Duration,
}

impl LlamaServerEngine {
    /// Build an engine from settings. Attaches when `settings.server_url`
    /// is set, spawns otherwise.
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: reqwest::Client::new(),
            binary: settings.server_binary.clone(),
            server_url: settings.server_url.clone(),
            startup_timeout: settings.startup_timeout,
        }
    }

    /// Engine that always talks to the server at `base_url`.
    pub fn attached(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            binary: PathBuf::from("llama-server"),
            server_url: Some(base_url.into()),
            startup_timeout: Duration::from_secs(120),
        }
    }

    async fn run(&self, request: &CompletionRequest, on_token: TokenSink<'_>) -> Result<String, String> {
        if let Some(url) = &self.server_url {
            debug!("Using running llama-server at {url}");
            return stream_completion(&self.client, url, request, on_token).await;
        }

        let mut server = ServerProcess::spawn(&self.binary, request).await?;
        let result = match server
            .wait_ready(&self.client, self.startup_timeout)
            .await
        {
            Ok(()) => stream_completion(&self.client, &server.base_url, request, on_token).await,
            Err(e) => Err(e),
        };
        server.shutdown().await;
        result
    }
}

impl InferenceEngine for LlamaServerEngine {
    fn name(&self) -> &str {
        "llama-server"
    }

    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
        on_token: TokenSink<'a>,
    ) -> CompletionFuture<'a> {
        Box::pin(self.run(request, on_token))
    }
}

// ── Spawned server ─────────────────────────────────────────────────

/// A `llama-server` child process bound to a loopback port.
struct ServerProcess {
    child: Child,
    base_url: String,
}

impl ServerProcess {
    async fn spawn(binary: &Path, request: &CompletionRequest) -> Result<Self, String> {
        if !request.model_path.is_file() {
            return Err(format!(
                "model file not found: {}",
                request.model_path.display()
            ));
        }

        let port = free_port()?;
        let (stdout, stderr) = if request.verbose {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        info!(
            "Starting {} for {} (n_ctx={}, port={port})",
            binary.display(),
            request.model_path.display(),
            request.n_ctx
        );

        let child = Command::new(binary)
            .arg("--model")
            .arg(&request.model_path)
            .arg("--ctx-size")
            .arg(request.n_ctx.to_string())
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => format!(
                    "failed to start {}: not found (install llama.cpp or set LLAMA_SERVER_BIN)",
                    binary.display()
                ),
                _ => format!("failed to start {}: {e}", binary.display()),
            })?;

        Ok(Self {
            child,
            base_url: format!("http://127.0.0.1:{port}"),
        })
    }

    /// Poll `/health` until the model is loaded.
    async fn wait_ready(&mut self, client: &reqwest::Client, timeout: Duration) -> Result<(), String> {
        let start = Instant::now();
        let health_url = format!("{}/health", self.base_url);

        loop {
            if let Some(status) = self
                .child
                .try_wait()
                .map_err(|e| format!("failed to poll llama-server: {e}"))?
            {
                return Err(format!(
                    "llama-server exited with {status} before becoming ready (rerun with -o verbose true for its output)"
                ));
            }

            // A server can accept and never answer; bound each health check.
            let remaining = timeout.saturating_sub(start.elapsed());
            let check = client
                .get(&health_url)
                .timeout(remaining.max(HEALTH_POLL_INTERVAL))
                .send();
            match check.await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(
                        "llama-server ready after {:.1}s",
                        start.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
                // 503 while the model loads; connection refused before bind.
                Ok(_) | Err(_) => {}
            }

            if start.elapsed() >= timeout {
                return Err(format!(
                    "llama-server did not become ready within {}s",
                    timeout.as_secs()
                ));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    async fn shutdown(mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        if let Err(e) = self.child.kill().await {
            warn!("Failed to stop llama-server: {e}");
        }
    }
}

/// Ask the OS for an unused loopback port.
fn free_port() -> Result<u16, String> {
    let listener =
        TcpListener::bind("127.0.0.1:0").map_err(|e| format!("failed to find a free port: {e}"))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| format!("failed to find a free port: {e}"))
}

// ── Completion stream ──────────────────────────────────────────────

/// POST `request` to `{base_url}/completion` and stream tokens to `on_token`.
pub async fn stream_completion(
    client: &reqwest::Client,
    base_url: &str,
    request: &CompletionRequest,
    on_token: TokenSink<'_>,
) -> Result<String, String> {
    let url = format!("{}/completion", base_url.trim_end_matches('/'));
    debug!(
        "Completion request: {} prompt bytes, n_predict={:?}",
        request.prompt.len(),
        request.n_predict
    );
    let start = Instant::now();

    let mut resp = client
        .post(&url)
        .json(request)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(format!("llama-server HTTP {status}: {text}"));
    }

    let mut decoder = SseDecoder::new();
    let mut events = Vec::new();
    let mut output = String::new();

    loop {
        let chunk = resp
            .chunk()
            .await
            .map_err(|e| format!("failed to read streaming chunk: {e}"))?;
        match chunk {
            Some(bytes) => decoder.push(&bytes, &mut events),
            None => decoder.finish(&mut events),
        }

        for event in events.drain(..) {
            match event {
                StreamEvent::Token(text) => {
                    on_token(&text);
                    output.push_str(&text);
                }
                StreamEvent::Error(message) => {
                    return Err(format!("llama-server error: {message}"));
                }
                StreamEvent::Done(info) => {
                    if let Some(info) = info {
                        debug!(
                            "Generation finished: predicted={:?}, evaluated={:?}, stop={:?}, truncated={:?}",
                            info.tokens_predicted, info.tokens_evaluated, info.stop_type, info.truncated
                        );
                    }
                }
            }
        }

        if decoder.is_done() {
            break;
        }
    }

    debug!(
        "Completion finished in {:.1}s ({} bytes)",
        start.elapsed().as_secs_f64(),
        output.len()
    );
    Ok(output)
}
