//! strand - conversation state pipeline CLI

mod commands;
mod config;
mod render;
mod store;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use commands::{ReplayOptions, ShowOptions};
use store::FileStore;

/// strand - fold, normalize and persist model conversations
#[derive(Parser, Debug)]
#[command(name = "strand")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding stored conversations
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// User the conversations belong to
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay recorded fragments (JSONL) into a conversation and print the result
    Replay {
        /// Recording to read, or `-` for stdin
        input: String,

        /// Conversation to append to (default: a new conversation)
        #[arg(short, long)]
        conversation: Option<String>,

        /// Print the buffered history instead of the model view
        #[arg(long)]
        raw: bool,
    },
    /// Print a stored conversation
    Show {
        conversation: String,

        /// Show what the next model call would receive
        #[arg(short, long)]
        model_view: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored conversations
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        EnvFilter::new("strand=debug,strand_history=debug,strand_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    // Merge config with CLI args (CLI takes precedence)
    let cfg = config::Config::load();
    let data_dir = args
        .data_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.data_dir());
    let user_id = args.user.unwrap_or_else(|| cfg.user_id());
    let store = Arc::new(FileStore::new(&data_dir));
    tracing::debug!(data_dir = %data_dir.display(), %user_id, "using store");

    match command {
        Command::Replay {
            input,
            conversation,
            raw,
        } => {
            let conversation_id =
                conversation.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let context = cfg.operation_context(&user_id, &conversation_id);
            let options = ReplayOptions {
                persist: cfg.persist_options(),
                sanitize: cfg.sanitize_options(),
                raw,
            };

            let history = if input == "-" {
                commands::replay(tokio::io::stdin(), store, &context, &options).await?
            } else {
                let file = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("Failed to open {}", input))?;
                commands::replay(file, store, &context, &options).await?
            };

            eprintln!("strand conversation: {}", conversation_id);
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::Show {
            conversation,
            model_view,
            json,
        } => {
            let options = ShowOptions {
                model_view,
                json,
                sanitize: cfg.sanitize_options(),
            };
            let out = commands::show(store.as_ref(), &user_id, &conversation, options).await?;
            println!("{}", out);
        }
        Command::List => {
            commands::list_conversations(&store, &user_id).await?;
        }
    }

    Ok(())
}
