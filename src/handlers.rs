/// Message handlers module
///
/// This module handles:
/// - The consultation commands (/start, /help, /cancel)
/// - Patient complaints while a consultation is open
/// - The quick-action reply keyboard
/// - Per-user conversation history through the `SessionManager`

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use teloxide::{
    dispatching::dialogue::InMemStorage,
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode},
    utils::html,
};

use crate::rag::{Consultant, HomeopathyDoctor};
use crate::session::SessionManager;

pub const MORE_DETAILS_ACTION: &str = "🔍 Describe more symptoms or answer questions";
pub const NEW_CONSULTATION_ACTION: &str = "🔄 Start a new consultation";

/// Conversation state kept by the dispatcher for each chat
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    /// No consultation open; plain text gets a pointer to /start
    #[default]
    Idle,
    /// The patient is describing symptoms
    DescribingSymptoms,
}

pub type DoctorDialogue = Dialogue<State, InMemStorage<State>>;

/// Buttons offered after each answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickAction {
    MoreDetails,
    NewConsultation,
}

impl QuickAction {
    /// Recognise a quick-action button press by its leading emoji
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_start();
        if text.starts_with('🔍') {
            Some(QuickAction::MoreDetails)
        } else if text.starts_with('🔄') {
            Some(QuickAction::NewConsultation)
        } else {
            None
        }
    }
}

pub fn quick_actions_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(MORE_DETAILS_ACTION)],
        vec![KeyboardButton::new(NEW_CONSULTATION_ACTION)],
    ])
    .one_time_keyboard(true)
    .resize_keyboard(true)
}

/// Plain text that is neither a command nor a quick-action button
pub fn is_complaint(text: Option<&str>) -> bool {
    match text {
        Some(t) => !t.starts_with('/') && QuickAction::parse(t).is_none(),
        None => false,
    }
}

/// Key for the session store: the sender, or the chat when there is no sender
pub fn user_key(msg: &Message) -> u64 {
    msg.from()
        .map(|user| user.id.0)
        .unwrap_or_else(|| msg.chat.id.0.unsigned_abs())
}

pub fn welcome_text(first_name: &str) -> String {
    format!(
        "👋 Hello <b>{}</b>! I'm your AI Homeopathy Doctor 🤖\n\n\
        I can help you analyze symptoms and suggest potential homeopathic remedies based on medical knowledge.\n\n\
        💡 <b>How to use:</b>\n\
        1. Describe your symptoms in detail\n\
        2. I'll ask clarifying questions (max 3 in the first turn)\n\
        3. I'll suggest potential homeopathic remedies within 3 turns\n\n\
        ⚠️ <b>Important Disclaimer:</b>\n\
        This is for educational purposes only. Always consult a qualified homeopath or medical professional for proper diagnosis and treatment.\n\n\
        Type your symptoms below to begin...",
        html::escape(first_name)
    )
}

pub const HELP_TEXT: &str = "🤖 <b>Homeopathy AI Doctor Bot Help</b>\n\n\
    <b>Available Commands:</b>\n\
    /start - Begin a new consultation (resets history)\n\
    /help - Show this help message\n\
    /cancel - End current consultation\n\n\
    <b>How to get the best results:</b>\n\
    • Describe symptoms in detail\n\
    • Mention location, intensity, and timing\n\
    • Share what makes symptoms better/worse\n\
    • Be specific about associated feelings\n\n\
    <b>Disclaimer:</b> This bot provides educational information only. Always consult qualified medical professionals.";

/// The doctor's answer as sent to the chat
pub fn format_answer(reply: &str) -> String {
    format!("🩺 <b>Homeopathy Doctor:</b>\n\n{}", html::escape(reply))
}

/// Handle the /start command: fresh session, welcome, open the consultation
pub async fn handle_start(
    bot: Bot,
    msg: Message,
    dialogue: DoctorDialogue,
    sessions: Arc<SessionManager>,
) -> Result<()> {
    let user_id = user_key(&msg);
    sessions.reset(user_id).await;

    let first_name = msg
        .from()
        .map(|user| user.first_name.clone())
        .unwrap_or_else(|| "there".to_string());

    bot.send_message(msg.chat.id, welcome_text(&first_name))
        .parse_mode(ParseMode::Html)
        .await?;

    dialogue.update(State::DescribingSymptoms).await?;
    log::info!("Consultation started for user {}", user_id);
    Ok(())
}

/// Handle the /help command
pub async fn handle_help(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, HELP_TEXT)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Handle the /cancel command: forget the patient and close the consultation
pub async fn handle_cancel(
    bot: Bot,
    msg: Message,
    dialogue: DoctorDialogue,
    sessions: Arc<SessionManager>,
) -> Result<()> {
    let user_id = user_key(&msg);
    sessions.remove(user_id).await;
    dialogue.exit().await?;

    bot.send_message(
        msg.chat.id,
        "👋 Consultation ended. Thank you for using Homeopathy AI Doctor!\n\n\
        Remember to consult a qualified homeopath for proper treatment. 🌿",
    )
    .reply_markup(KeyboardRemove::new())
    .await?;

    log::info!("Consultation cancelled for user {}", user_id);
    Ok(())
}

/// Handle a quick-action button press
pub async fn handle_quick_action(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionManager>,
) -> Result<()> {
    let action = match msg.text().and_then(QuickAction::parse) {
        Some(action) => action,
        None => return Ok(()),
    };

    match action {
        QuickAction::MoreDetails => {
            bot.send_message(
                msg.chat.id,
                "Please provide any additional details or clarify the Doctor's previous questions...",
            )
            .await?;
        }
        QuickAction::NewConsultation => {
            sessions.reset(user_key(&msg)).await;
            bot.send_message(
                msg.chat.id,
                "🔄 Starting new consultation. Please describe your symptoms...",
            )
            .await?;
        }
    }

    Ok(())
}

/// Remove the "analyzing" placeholder; failing to do so is not worth aborting the reply
async fn delete_placeholder(bot: &Bot, placeholder: &Message) {
    if let Err(e) = bot.delete_message(placeholder.chat.id, placeholder.id).await {
        log::warn!("Could not delete processing message: {}", e);
    }
}

/// Main complaint handler
///
/// This function:
/// 1. Counts the consultation message
/// 2. Shows typing and an "analyzing" placeholder
/// 3. Asks the doctor with the patient's history
/// 4. Records the exchange in the history window
/// 5. Replaces the placeholder with the answer and offers quick actions
pub async fn handle_symptoms(
    bot: Bot,
    msg: Message,
    doctor: Arc<HomeopathyDoctor>,
    sessions: Arc<SessionManager>,
) -> Result<()> {
    let complaint = match msg.text().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => return Ok(()),
    };

    let user_id = user_key(&msg);
    let count = sessions.increment_consultations(user_id).await;
    log::info!("Message #{} from user {}: {}", count, user_id, complaint);

    bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;
    let placeholder = bot
        .send_message(msg.chat.id, "🔍 Analyzing your symptoms...")
        .await?;

    let history = sessions.get_or_create(user_id).await.history;

    match doctor.consult(&complaint, &history).await {
        Ok(consultation) => {
            if !consultation.succeeded {
                log::warn!("Replying to user {} with a completion failure", user_id);
            }
            sessions
                .record_turn(user_id, complaint, consultation.reply.clone())
                .await;

            delete_placeholder(&bot, &placeholder).await;

            bot.send_message(msg.chat.id, format_answer(&consultation.reply))
                .parse_mode(ParseMode::Html)
                .await?;

            bot.send_message(msg.chat.id, "What would you like to do next?")
                .reply_markup(quick_actions_keyboard())
                .await?;
        }
        Err(e) => {
            log::error!("Error processing message: {:#}", e);
            delete_placeholder(&bot, &placeholder).await;
            bot.send_message(msg.chat.id, "❌ Sorry, I encountered an error. Please try again.")
                .await?;
        }
    }

    Ok(())
}

/// Plain text outside a consultation
pub async fn handle_idle_text(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(
        msg.chat.id,
        "👋 Welcome! To begin a new consultation and describe your symptoms, please use the <b>/start</b> command. Thank you!",
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}
