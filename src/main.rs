/// Homeopathy Doctor Telegram Bot
///
/// A Telegram bot that uses RAG (Retrieval-Augmented Generation) to suggest
/// homeopathic remedies from a homeopathy book.
///
/// The bot:
/// - Opens a consultation with /start and closes it with /cancel
/// - Searches the book's embeddings in PostgreSQL (pgvector)
/// - Asks an OpenRouter-hosted model for the diagnosis
/// - Remembers the last few turns of each patient's consultation

use anyhow::Result;
use homeopathy_doctor_bot::{bot, config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting Telegram Homeopathy Bot...");

    let cfg = config::Config::from_env()?;

    // Token, vector store and API key must all be in place before we go online
    cfg.check_dependencies(config::Requirements::telegram_bot()).await?;

    bot::run_bot(cfg).await?;

    Ok(())
}
