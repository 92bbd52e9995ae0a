//! Manage local GGUF models and run prompts against them with llama.cpp.
//!
//! # Examples
//!
//! ```sh
//! # Download and register a Llama 2 chat model
//! llama-gguf download-model \
//!   https://huggingface.co/TheBloke/Llama-2-7B-Chat-GGUF/resolve/main/llama-2-7b-chat.Q6_K.gguf \
//!   --alias llama2-chat --llama2-chat
//!
//! # Register a file that is already on disk
//! llama-gguf add-model ~/models/orca-mini-3b.gguf -a orca
//!
//! # Run a prompt, then continue the conversation
//! llama-gguf prompt "Name three rivers." -m llama2-chat
//! llama-gguf prompt "Which is longest?" -c
//!
//! # Pass model options
//! llama-gguf prompt "Write a haiku" -m orca -o temperature 0.2 -o max_tokens 64
//! ```

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use llama_gguf::prelude::*;
use llama_gguf::download::download_model;
use llama_gguf::retry::RetryConfig;
use tracing::{debug, info};

/// Run local GGUF models through llama.cpp.
#[derive(Parser)]
#[command(name = "llama-gguf", version)]
struct Cli {
    /// Data directory (overrides LLAMA_GGUF_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Log more to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the path to the models.json file
    ModelsFile,

    /// Print the path to the directory holding downloaded models
    ModelsDir,

    /// Download and register a model from a URL
    DownloadModel {
        /// URL of a .gguf file
        url: String,

        /// Alias for the model (repeatable)
        #[arg(short, long = "alias")]
        aliases: Vec<String>,

        /// Mark as using the Llama 2 chat prompt format
        #[arg(long)]
        llama2_chat: bool,

        /// Retry transient HTTP failures this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },

    /// Register a GGUF model you have already downloaded
    AddModel {
        /// Path to the model file
        file: PathBuf,

        /// Alias for the model (repeatable)
        #[arg(short, long = "alias")]
        aliases: Vec<String>,

        /// Mark as using the Llama 2 chat prompt format
        #[arg(long)]
        llama2_chat: bool,
    },

    /// Unregister a model (the file is kept)
    RemoveModel {
        /// Model ID as shown by `models`
        model_id: String,
    },

    /// Print the registered models as JSON
    Models,

    /// Print the JSON schema of the options accepted by -o
    Options,

    /// Run a prompt
    Prompt {
        /// Prompt text; read from stdin when omitted
        text: Option<String>,

        /// Model ID or alias
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Model option (repeatable), e.g. -o temperature 0.5
        #[arg(short = 'o', long = "option", num_args = 2, value_names = ["KEY", "VALUE"])]
        options: Vec<String>,

        /// Continue the most recent conversation
        #[arg(short, long, conflicts_with = "cid")]
        r#continue: bool,

        /// Continue the conversation with this ID
        #[arg(long)]
        cid: Option<String>,

        /// Do not write the response to the log
        #[arg(long)]
        no_log: bool,
    },
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

/// Split flattened `-o KEY VALUE` arguments into pairs.
fn option_pairs(raw: &[String]) -> Vec<(String, String)> {
    raw.chunks_exact(2)
        .map(|kv| (kv[0].clone(), kv[1].clone()))
        .collect()
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| format!("failed to format JSON: {e}"))?;
    println!("{json}");
    Ok(())
}

/// Find the conversation to continue, if any.
fn load_conversation(
    log: &ResponseLog,
    continue_latest: bool,
    cid: Option<&str>,
) -> Result<Option<Conversation>, String> {
    let id = match (continue_latest, cid) {
        (_, Some(id)) => id.to_string(),
        (true, None) => log
            .latest_conversation_id()?
            .ok_or_else(|| "no conversation to continue".to_string())?,
        (false, None) => return Ok(None),
    };
    log.load_conversation(&id)?
        .map(Some)
        .ok_or_else(|| format!("no conversation found with id {id}"))
}

// ── Commands ───────────────────────────────────────────────────────

struct PromptArgs {
    text: Option<String>,
    model: Option<String>,
    system: Option<String>,
    options: Vec<String>,
    continue_latest: bool,
    cid: Option<String>,
    no_log: bool,
}

async fn run_prompt(settings: &Settings, args: PromptArgs) -> Result<(), String> {
    let registry = ModelRegistry::new(&settings.home);
    let log = ResponseLog::new(&settings.home);

    let conversation = load_conversation(&log, args.continue_latest, args.cid.as_deref())?;

    let name = args
        .model
        .or_else(|| conversation.as_ref().map(|c| c.model_id.clone()))
        .ok_or_else(|| "no model given (use -m MODEL)".to_string())?;
    let mut model = registry
        .resolve(&name)?
        .ok_or_else(|| format!("unknown model: {name}"))?;
    if model.default_system_prompt.is_none()
        && let Some(system) = &settings.default_system_prompt
    {
        model = model.with_default_system_prompt(system.clone());
    }

    let options = Options::from_pairs(&option_pairs(&args.options))?;

    let text = match args.text {
        Some(text) => text,
        None => read_stdin_content()?,
    };
    let mut prompt = Prompt::new(text);
    if let Some(system) = args.system {
        prompt = prompt.with_system(system);
    }

    let engine = LlamaServerEngine::new(settings);
    let response = model
        .execute(&prompt, conversation.as_ref(), &options, &engine, |token| {
            let mut out = io::stdout().lock();
            let _ = out.write_all(token.as_bytes());
            let _ = out.flush();
        })
        .await?;
    println!();

    if args.no_log {
        debug!("Not logging response {}", response.id);
    } else {
        log.append(&response)?;
        info!(
            "Logged response {} (conversation {})",
            response.id, response.conversation_id
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut settings = Settings::from_env();
    if let Some(home) = &cli.home {
        settings = settings.with_home(home);
    }
    debug!("Data directory: {}", settings.home.display());
    let registry = ModelRegistry::new(&settings.home);

    match cli.command {
        Command::ModelsFile => {
            registry.ensure_home()?;
            println!("{}", registry.models_file().display());
        }
        Command::ModelsDir => {
            println!("{}", registry.ensure_models_dir()?.display());
        }
        Command::DownloadModel {
            url,
            aliases,
            llama2_chat,
            retries,
        } => {
            download_model(
                &registry,
                &url,
                &aliases,
                llama2_chat,
                &RetryConfig::with_retries(retries),
            )
            .await?;
        }
        Command::AddModel {
            file,
            aliases,
            llama2_chat,
        } => {
            let model_id = registry.add_model(&file, &aliases, llama2_chat)?;
            info!("Registered {model_id}");
        }
        Command::RemoveModel { model_id } => {
            if !registry.remove_model(&model_id)? {
                return Err(format!("unknown model: {model_id}"));
            }
        }
        Command::Models => {
            registry.ensure_models_file()?;
            print_json(&registry.load()?)?;
        }
        Command::Options => {
            print_json(&Options::schema())?;
        }
        Command::Prompt {
            text,
            model,
            system,
            options,
            r#continue,
            cid,
            no_log,
        } => {
            run_prompt(
                &settings,
                PromptArgs {
                    text,
                    model,
                    system,
                    options,
                    continue_latest: r#continue,
                    cid,
                    no_log,
                },
            )
            .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    llama_gguf::logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
