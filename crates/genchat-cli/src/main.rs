use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use genchat_core::{BackendKind, BackendParams, EventStream, GenChat, Generation, Request, default_model};

mod config;

use config::GenChatConfig;

#[derive(Parser)]
#[command(name = "genchat")]
#[command(version)]
#[command(about = "genchat: one prompt, any LLM backend")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt to one provider
    Ask {
        /// google, openai, deepseek, mistral or anthropic
        #[arg(short, long)]
        provider: BackendKind,

        /// Model name (defaults to the provider's fallback model)
        #[arg(short, long)]
        model: Option<String>,

        /// System instruction
        #[arg(short, long)]
        system: Option<String>,

        #[arg(short, long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Include the backend's raw payload in the output
        #[arg(long)]
        raw: bool,

        /// Print text as it arrives
        #[arg(long)]
        stream: bool,

        /// Print the normalized output (or each stream event) as JSON
        #[arg(long)]
        json: bool,

        /// Retry on other configured providers if this one fails
        #[arg(long)]
        fallback: bool,

        /// The prompt
        #[arg(required = true)]
        prompt: Vec<String>,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

struct AskArgs {
    provider: BackendKind,
    params: BackendParams,
    json: bool,
    fallback: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so streamed text on stdout stays clean
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Ask {
            provider,
            model,
            system,
            temperature,
            max_tokens,
            raw,
            stream,
            json,
            fallback,
            prompt,
        } => {
            let Some(model) = model.or_else(|| default_model(provider).map(String::from)) else {
                bail!("--model is required for {}", provider);
            };
            let mut params = BackendParams::new(model, prompt.join(" "))
                .with_raw(raw)
                .with_stream(stream);
            if let Some(system) = system {
                params = params.with_system(system);
            }
            if let Some(temperature) = temperature {
                params = params.with_temperature(temperature);
            }
            if let Some(max_tokens) = max_tokens {
                params = params.with_max_tokens(max_tokens);
            }
            let args = AskArgs {
                provider,
                params,
                json,
                fallback,
            };
            cmd_ask(&cli.config, args).await
        }
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("genchat initialized at {}", config_dir.display());
    println!("Export your API keys or edit {} to configure providers.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = GenChatConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.masked())?);
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, args: AskArgs) -> Result<()> {
    let cfg = GenChatConfig::load(config_path)?;
    let mut registration = cfg.into_registration();
    if args.fallback {
        registration = registration.with_fallback(true);
    }
    let client = GenChat::new(registration).context("Failed to create client")?;

    let request = Request::for_backend(args.provider, args.params);
    match client.generate(&request).await? {
        Generation::Complete(output) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", output.data);
            }
            if output.provider != args.provider {
                info!("Answered by fallback provider {} ({})", output.provider, output.model);
            }
            if let Some(usage) = output.usage {
                info!(
                    "Tokens: {} prompt, {} completion, {} total",
                    usage.prompt, usage.completion, usage.total
                );
            }
        }
        Generation::Stream(stream) => print_stream(stream, args.json).await?,
    }

    Ok(())
}

/// Drain a stream to stdout until its terminal event, an error, or Ctrl-C.
/// Dropping the stream on return closes the connection.
async fn print_stream(mut stream: EventStream, json: bool) -> Result<()> {
    let mut stdout = std::io::stdout();
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("Interrupted, closing stream");
                break;
            }
            event = stream.next() => {
                let Some(event) = event else { break };
                let event = event?;
                if json {
                    writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
                } else {
                    write!(stdout, "{}", event.text)?;
                    stdout.flush()?;
                }
                if event.done {
                    if let Some(tokens) = event.tokens {
                        info!("Tokens: {} total", tokens.total);
                    }
                    break;
                }
            }
        }
    }

    if !json {
        writeln!(stdout)?;
    }
    Ok(())
}
