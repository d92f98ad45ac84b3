mod agent;
mod config;
mod database;
mod error;
mod llm;
mod models;
mod repl;
mod server;
mod tools;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use agent::{Agent, ChatContext, Conversation};
use config::Config;
use database::Store;
use llm::OpenAiClient;
use models::SeedData;

/// Conversational agent over the Evolyn accounts database.
#[derive(Parser)]
#[command(name = "evolyn-agent", version, about)]
struct Cli {
    /// Path to the TOML configuration file (optional)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat on the terminal (default)
    Chat(ContextArgs),
    /// Serve the HTTP API
    Serve {
        /// Port to listen on, overrides the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send one message and print the reply
    Ask {
        message: String,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Create the tables and optionally load seed data
    InitDb {
        /// JSON file with `accounts` and `facilities` arrays
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct ContextArgs {
    #[arg(long)]
    account_id: Option<String>,
    #[arg(long)]
    facility_id: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
}

impl From<ContextArgs> for ChatContext {
    fn from(args: ContextArgs) -> Self {
        ChatContext {
            account_id: args.account_id,
            facility_id: args.facility_id,
            user_id: args.user_id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    pretty_env_logger::init();

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    log::info!("Configuration loaded successfully");

    match cli.command.unwrap_or(Command::Chat(ContextArgs::default())) {
        Command::Chat(context) => {
            let (agent, _) = build_agent(&config).await?;
            let ctx = ChatContext::from(context);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            repl::run_repl(&agent, &ctx, stdin, tokio::io::stdout()).await?;
        }
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let (agent, store) = build_agent(&config).await?;
            let state = server::AppState {
                agent: Arc::new(agent),
                store,
            };
            server::serve(state, &config.server).await?;
        }
        Command::Ask { message, context } => {
            let (agent, _) = build_agent(&config).await?;
            let ctx = ChatContext::from(context);
            let mut conversation = Conversation::new();
            let reply = agent.reply(&mut conversation, &message, &ctx).await;
            println!("{}", reply.text);
        }
        Command::InitDb { seed } => init_db(&config, seed).await?,
    }

    Ok(())
}

/// Connect to the database and the completion service. Both are required.
async fn build_agent(config: &Config) -> Result<(Agent, Arc<dyn Store>)> {
    config.validate_for_agent()?;

    let store = open_store(config).await?;

    let model = Arc::new(OpenAiClient::new(&config.llm));
    log::info!("Using model {} at {}", model.model, model.endpoint);

    let agent = Agent::new(model, Arc::clone(&store), &config.agent);
    log::info!("Agent initialized");
    Ok((agent, store))
}

async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    let store = database::connect(&config.database)
        .await
        .context("Failed to connect to the database")?;
    store
        .ping()
        .await
        .context("Database did not answer the connectivity check")?;
    log::info!("Database connection verified ({})", store.backend());
    Ok(store)
}

async fn init_db(config: &Config, seed: Option<PathBuf>) -> Result<()> {
    let store = open_store(config).await?;
    store
        .provision_schema()
        .await
        .context("Failed to create tables")?;
    println!("✅ Tables ready (accounts, facilities, notes)");

    let Some(path) = seed else {
        return Ok(());
    };
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let data: SeedData = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))?;

    for account in &data.accounts {
        store
            .upsert_account(account)
            .await
            .with_context(|| format!("Failed to load account {}", account.account_id))?;
    }
    for facility in &data.facilities {
        store
            .upsert_facility(facility)
            .await
            .with_context(|| format!("Failed to load facility {}", facility.facility_id))?;
    }

    println!(
        "✅ Loaded {} account(s) and {} facility(ies) from {}",
        data.accounts.len(),
        data.facilities.len(),
        path.display()
    );
    Ok(())
}
