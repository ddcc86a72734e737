mod picker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zbot_agents::{Conversation, OpenAiProvider};
use zbot_channels::IMessageBot;
use zbot_channels::OnTriggerFn;
use zbot_channels::imessage::chatdb::ChatDb;
use zbot_channels::imessage::contacts::{
    AddressBookSource, ContactBook, ContactSource, Directory,
};
use zbot_channels::imessage::sender::AppleScriptSender;
use zbot_common::Destination;
use zbot_config::ConfigLoader;
use zbot_security::{RedactingWriter, resolve_openai_key};

#[derive(Debug, Parser)]
#[command(
    name = "zbot",
    version,
    about = "iMessage GPT bot with Contacts name resolution"
)]
struct Cli {
    /// Filter chats by substring (name/identifier/contact)
    #[arg(long)]
    hint: Option<String>,

    /// Skip the picker and run for this chat_id
    #[arg(long)]
    chat_id: Option<i64>,

    /// Resolve 1:1 phone/email to Contacts names
    #[arg(long)]
    with_contacts: bool,

    /// How many recent chats to show [default: 30]
    #[arg(long)]
    limit: Option<usize>,

    /// Path to a YAML config file (default: ~/.zbot/config.yml)
    #[arg(long, env = "ZBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(RedactingWriter::stderr());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_contacts(root: Option<PathBuf>) -> ContactBook {
    let directory = match root {
        Some(root) => AddressBookSource::new(root).load(),
        None => Directory::Unavailable("home directory not found".to_string()),
    };
    let book = ContactBook::from_directory(directory);
    if book.is_available() {
        info!("resolved {} contact handles", book.len());
    }
    book
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    init_tracing(cli.json_logs);

    let config = ConfigLoader::new(cli.config.clone())
        .load()
        .context("failed to load configuration")?;
    let api_key = resolve_openai_key()?;

    let db = ChatDb::open(&config.chat_db_path(), config.busy_timeout())?;

    let chat_id = match cli.chat_id {
        Some(id) => id,
        None => {
            let contacts = cli
                .with_contacts
                .then(|| load_contacts(AddressBookSource::default_root()));
            let limit = cli.limit.unwrap_or(config.list_limit);
            match picker::pick_chat(&db, contacts.as_ref(), cli.hint.as_deref(), limit)? {
                Some(entry) => {
                    info!("selected {} (chat_id={})", entry.label, entry.chat_id);
                    entry.chat_id
                }
                None => return Ok(()),
            }
        }
    };

    let chat_name = db
        .chat_name(chat_id)
        .with_context(|| format!("could not resolve a send name for chat_id {chat_id}"))?;
    if chat_name.is_empty() {
        warn!("chat {chat_id} has neither a display name nor an identifier");
    }
    let destination = Destination::from_chat_name(&chat_name);

    let provider = Arc::new(OpenAiProvider::new(api_key, config.openai_base_url.clone()));
    let mut conversation =
        Conversation::new(provider, config.model.clone(), config.max_context_messages);
    conversation.set_system_message(config.system_prompt.clone());
    let conversation = Arc::new(Mutex::new(conversation));

    let on_trigger: OnTriggerFn = Arc::new(move |prompt: String| {
        let conversation = Arc::clone(&conversation);
        Box::pin(async move { conversation.lock().await.chat(&prompt).await })
    });

    let bot = IMessageBot::new(
        chat_id,
        destination,
        &config,
        Box::new(db),
        Arc::new(AppleScriptSender::new()),
        on_trigger,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl-C, stopping"),
            Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("model: {}", config.model);
    bot.run(shutdown_rx).await?;
    Ok(())
}
