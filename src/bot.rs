/// Telegram bot module
///
/// This module sets up and runs the Telegram bot using the teloxide framework.
/// It connects all the pieces: configuration, the doctor, handlers, and per-user sessions.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::{
    dispatching::dialogue::InMemStorage, error_handlers::LoggingErrorHandler, prelude::*,
    types::Me, utils::command::BotCommands,
};
use tokio::time::sleep;

use crate::config::Config;
use crate::handlers::{
    handle_cancel, handle_help, handle_idle_text, handle_quick_action, handle_start,
    handle_symptoms, is_complaint, user_key, DoctorDialogue, QuickAction, State,
};
use crate::rag::HomeopathyDoctor;
use crate::session::SessionManager;

/// Bot commands that users can use
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "Begin a new consultation (resets history)")]
    Start,
    #[command(description = "Show help information")]
    Help,
    #[command(description = "End current consultation")]
    Cancel,
}

/// Log a failed handler and tell the patient something went wrong
async fn report_failure(bot: &Bot, msg: &Message, result: Result<()>) {
    if let Err(e) = result {
        log::error!("Update from user {} caused error: {:#}", user_key(msg), e);

        if let Err(send_err) = bot
            .send_message(
                msg.chat.id,
                "❌ Sorry, I encountered an unexpected error. Please try again or use /start to begin a new consultation.",
            )
            .await
        {
            log::warn!("Could not deliver error notice: {}", send_err);
        }
    }
}

async fn command_endpoint(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dialogue: DoctorDialogue,
    sessions: Arc<SessionManager>,
) -> Result<()> {
    let result = match cmd {
        Command::Start => handle_start(bot.clone(), msg.clone(), dialogue, sessions).await,
        Command::Help => handle_help(bot.clone(), msg.clone()).await,
        Command::Cancel => handle_cancel(bot.clone(), msg.clone(), dialogue, sessions).await,
    };
    report_failure(&bot, &msg, result).await;
    Ok(())
}

async fn quick_action_endpoint(bot: Bot, msg: Message, sessions: Arc<SessionManager>) -> Result<()> {
    let result = handle_quick_action(bot.clone(), msg.clone(), sessions).await;
    report_failure(&bot, &msg, result).await;
    Ok(())
}

async fn symptoms_endpoint(
    bot: Bot,
    msg: Message,
    doctor: Arc<HomeopathyDoctor>,
    sessions: Arc<SessionManager>,
) -> Result<()> {
    let result = handle_symptoms(bot.clone(), msg.clone(), doctor, sessions).await;
    report_failure(&bot, &msg, result).await;
    Ok(())
}

async fn idle_endpoint(bot: Bot, msg: Message) -> Result<()> {
    let result = handle_idle_text(bot.clone(), msg.clone()).await;
    report_failure(&bot, &msg, result).await;
    Ok(())
}

/// Initialize and run the Telegram bot with a pre-initialized doctor
pub async fn run_bot_with_doctor(config: Config, doctor: Arc<HomeopathyDoctor>) -> Result<()> {
    log::info!("Initializing bot...");

    let token = config
        .telegram_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN must be set")?;

    let sessions = Arc::new(SessionManager::new(config.max_conversation_history));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .context("Failed to create HTTP client")?;

    let bot = Bot::with_client(token, client);

    let me = retry_get_me(&bot)
        .await
        .context("Failed to connect to Telegram API after multiple retries")?;
    log::info!("Bot started: @{}", me.username());

    let handler = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<State>, State>()
        // Commands work in every state
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(command_endpoint),
        )
        .branch(
            dptree::case![State::DescribingSymptoms]
                .branch(
                    dptree::filter(|msg: Message| msg.text().and_then(QuickAction::parse).is_some())
                        .endpoint(quick_action_endpoint),
                )
                .branch(
                    dptree::filter(|msg: Message| is_complaint(msg.text()))
                        .endpoint(symptoms_endpoint),
                ),
        )
        .branch(
            dptree::case![State::Idle]
                .filter(|msg: Message| msg.text().map_or(false, |t| !t.starts_with('/')))
                .endpoint(idle_endpoint),
        );

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![
            doctor,
            sessions,
            InMemStorage::<State>::new(),
            me.clone()
        ])
        .default_handler(|update| async move {
            log::debug!("Unhandled update: {:?}", update.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build();

    log::info!("Bot is running. Press Ctrl+C to stop.");
    dispatcher.dispatch().await;

    Ok(())
}

/// Retry getting bot info with exponential backoff
async fn retry_get_me(bot: &Bot) -> Result<Me> {
    let max_retries = 5;
    let mut delay = Duration::from_secs(2);

    log::info!("Attempting to connect to Telegram API...");

    for attempt in 1..=max_retries {
        match bot.get_me().await {
            Ok(me) => {
                log::info!("Successfully connected to Telegram API on attempt {}", attempt);
                return Ok(me);
            }
            Err(e) if attempt == max_retries => {
                log::error!("Check your internet connection and that https://api.telegram.org is reachable");
                anyhow::bail!(
                    "Failed to connect to Telegram API after {} attempts: {}",
                    max_retries,
                    e
                );
            }
            Err(e) => {
                log::warn!(
                    "Failed to connect to Telegram API (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
                delay *= 2;
            }
        }
    }

    unreachable!()
}

/// Initialize and run the Telegram bot (creates its own doctor)
pub async fn run_bot(config: Config) -> Result<()> {
    let doctor = Arc::new(HomeopathyDoctor::new(&config).await?);
    run_bot_with_doctor(config, doctor).await
}
