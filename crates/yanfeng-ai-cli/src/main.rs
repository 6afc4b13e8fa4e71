use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use yanfeng_ai::config_cache::ConfigCache;
use yanfeng_ai::providers::modelscope::ModelScopeProvider;
use yanfeng_ai::task::EntityContext;

mod commands;
mod configuration;
mod error;

use configuration::Settings;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to $CONFIG_DIR/yanfeng/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output, including request and response payloads
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the API key and endpoint
    Check,

    /// Send one message to the conversation agent
    Chat {
        message: String,

        /// Image to attach, may be repeated
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,

        /// YAML file declaring tools the model may call
        #[arg(short, long)]
        tools: Option<PathBuf>,

        /// Extra system prompt appended to the configured one
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Run a data generation task
    Data {
        instructions: String,

        /// JSON object describing the fields of the expected answer
        #[arg(long)]
        structure: Option<String>,
    },

    /// Generate or edit an image
    Image {
        prompt: String,

        /// Image to edit
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Where to save the result
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    let config = settings.provider.into_config();
    // One HTTP session for every request of this process
    let client = reqwest::Client::builder().timeout(config.timeout).build()?;
    let provider = Arc::new(ModelScopeProvider::with_client(client, config));
    let context = EntityContext::new(provider, settings.entity)?;

    match cli.command {
        Command::Check => commands::check::execute(&context).await,
        Command::Chat {
            message,
            images,
            tools,
            system,
        } => {
            let cache = ConfigCache::new();
            commands::chat::execute(&context, &cache, message, images, tools, system).await
        }
        Command::Data {
            instructions,
            structure,
        } => commands::data::execute(&context, instructions, structure).await,
        Command::Image {
            prompt,
            image,
            output,
        } => commands::image::execute(&context, prompt, image, output).await,
    }
}
