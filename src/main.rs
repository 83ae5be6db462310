use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use fileqa::app_state::ttl_from_mins;
use fileqa::catalog::{ModelId, MODELS};
use fileqa::chat;
use fileqa::constants::{
    DEFAULT_GROQ_BASE_URL, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT, DEFAULT_SESSION_TTL_MINS,
    DEFAULT_TIMEOUT_SECS,
};
use fileqa::web_server::{self, ServerConfig};
use fileqa::{ChatBackend, Document, GroqClient, GroqError, GroqSettings, Session};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Connection settings for the Groq API.
#[derive(clap::Args, Debug, Clone)]
struct GroqArgs {
    /// Groq API key.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Base URL of the Groq API.
    #[arg(long, env = "GROQ_BASE_URL", default_value = DEFAULT_GROQ_BASE_URL)]
    base_url: String,
    /// Request timeout in seconds.
    #[arg(long, env = "FILEQA_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

impl GroqArgs {
    fn settings(&self) -> GroqSettings {
        GroqSettings {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Builds a client from the configured key, if there is one.
    fn backend(&self) -> Result<Option<Arc<dyn ChatBackend>>> {
        match self.api_key.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(key) => {
                let client = GroqClient::new(key, &self.settings())
                    .context("Failed to create Groq client")?;
                Ok(Some(Arc::new(client)))
            }
        }
    }

    fn required_backend(&self) -> Result<Arc<dyn ChatBackend>> {
        self.backend()?
            .ok_or(GroqError::MissingApiKey)
            .context("Set GROQ_API_KEY or pass --api-key")
    }
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web UI.
    Serve {
        #[command(flatten)]
        groq: GroqArgs,
        #[arg(long, env = "FILEQA_HOST", default_value = "127.0.0.1", help = "Address to listen on.")]
        host: IpAddr,
        #[arg(long, env = "FILEQA_PORT", default_value_t = DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "templates", help = "Directory holding the page templates.")]
        templates_dir: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
        #[arg(long, help = "Reload templates when they change on disk.")]
        autoreload: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, help = "Largest accepted upload, in bytes.")]
        max_upload_bytes: usize,
        #[arg(long, default_value_t = DEFAULT_SESSION_TTL_MINS, help = "Minutes of inactivity before a session is dropped.")]
        session_ttl_mins: u64,
    },
    /// Ask one question about a local TXT or CSV file and print the answer.
    Ask {
        #[command(flatten)]
        groq: GroqArgs,
        #[arg(long, short, help = "The TXT or CSV file to ask about.")]
        file: PathBuf,
        #[arg(long, short, default_value_t = ModelId::default(), help = "Model to answer with.")]
        model: ModelId,
        /// The question to ask.
        question: String,
    },
    /// Chat interactively about a local TXT or CSV file.
    Chat {
        #[command(flatten)]
        groq: GroqArgs,
        #[arg(long, short, help = "The TXT or CSV file to chat about.")]
        file: PathBuf,
        #[arg(long, short, default_value_t = ModelId::default(), help = "Model to start with.")]
        model: ModelId,
    },
    /// List the models that can be selected.
    Models,
}

fn load_session(groq: &GroqArgs, file: &Path, model: ModelId) -> Result<Session> {
    // The file is checked before the key so bad uploads never reach the API.
    let document = Document::from_path(file)
        .with_context(|| format!("Could not load {}", file.display()))?;
    let backend = groq.required_backend()?;

    let mut session = Session::new(Some(backend));
    session.load_document(document);
    session.select_model(model);
    Ok(session)
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GROQ_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Logs go to stderr so answers on stdout stay clean.
    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,fileqa=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            groq,
            host,
            port,
            templates_dir,
            static_dir,
            autoreload,
            max_upload_bytes,
            session_ttl_mins,
        } => {
            let config = ServerConfig {
                host,
                port,
                templates_dir,
                static_dir,
                autoreload,
                max_upload_bytes,
                session_ttl: ttl_from_mins(session_ttl_mins),
                groq: groq.settings(),
            };
            let backend = groq.backend()?;
            info!("Starting fileqa web UI on port {}...", port);

            let mut web_server_handle =
                tokio::spawn(web_server::start_web_server(config, backend));

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(Ok(())) => warn!("Web server task exited."),
                        Ok(Err(e)) => {
                            error!("Web server failed: {:?}", e);
                            return Err(e);
                        }
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Ask {
            groq,
            file,
            model,
            question,
        } => {
            let mut session = load_session(&groq, &file, model)?;
            let turn = session
                .ask(&question, None)
                .await
                .context("Could not get an answer")?;
            println!("{}", turn.answer);
        }
        Commands::Chat { groq, file, model } => {
            let mut session = load_session(&groq, &file, model)?;
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            chat::run_chat(&mut session, input, tokio::io::stdout())
                .await
                .context("Chat session failed")?;
        }
        Commands::Models => {
            for model in MODELS {
                println!("{:<26} {:<24} {:>7} tokens", model.id, model.label, model.context_window);
            }
        }
    }

    Ok(())
}
