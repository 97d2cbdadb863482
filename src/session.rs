/// Conversation state module
///
/// This module holds:
/// - Chat messages in the role/content shape the completion API expects
/// - A bounded history that keeps only the most recent messages
/// - Per-user sessions for the Telegram bot

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of messages kept (3 user + 3 assistant)
pub const DEFAULT_HISTORY_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Represents a message in conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered list of prior turns with a sliding-window limit
#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
    max_len: usize,
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl ChatHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_len,
        }
    }

    /// Append a patient message and the doctor's reply, then trim to the window
    pub fn record_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.messages.push(ChatMessage::user(user));
        self.messages.push(ChatMessage::assistant(assistant));

        if self.messages.len() > self.max_len {
            let start = self.messages.len() - self.max_len;
            self.messages.drain(..start);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Contents of the patient's own messages, oldest first
    pub fn user_messages(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// State kept for one Telegram user
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub history: ChatHistory,
    pub consultation_count: u32,
}

impl Session {
    fn with_history_len(max_len: usize) -> Self {
        Self {
            history: ChatHistory::new(max_len),
            consultation_count: 0,
        }
    }
}

/// Manages sessions for multiple users
pub struct SessionManager {
    /// Maps Telegram user id to that user's session
    sessions: Arc<RwLock<HashMap<u64, Session>>>,
    max_history: usize,
}

impl SessionManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_history,
        }
    }

    /// Get a snapshot of the user's session, creating an empty one if needed
    pub async fn get_or_create(&self, user_id: u64) -> Session {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id)
            .or_insert_with(|| Session::with_history_len(self.max_history))
            .clone()
    }

    /// Count a new consultation message and return the updated total
    pub async fn increment_consultations(&self, user_id: u64) -> u32 {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(user_id)
            .or_insert_with(|| Session::with_history_len(self.max_history));
        session.consultation_count += 1;
        session.consultation_count
    }

    /// Record a completed exchange in the user's history
    pub async fn record_turn(&self, user_id: u64, user: String, assistant: String) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id)
            .or_insert_with(|| Session::with_history_len(self.max_history))
            .history
            .record_turn(user, assistant);
    }

    /// Replace the user's session with a fresh one
    pub async fn reset(&self, user_id: u64) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(user_id, Session::with_history_len(self.max_history));
    }

    /// Forget the user entirely
    pub async fn remove(&self, user_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&user_id).is_some()
    }
}
