/// RAG (Retrieval-Augmented Generation) module
///
/// This module handles:
/// - Building the retrieval query from the patient's accumulated complaints
/// - Retrieving the closest book chunks from the vector store
/// - Prompt building with book context and conversation history
/// - Calling the chat-completion API for the doctor's reply

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::embeddings::{build_embedder, Embedder};
use crate::llm::{CompletionClient, CompletionSettings};
use crate::session::{ChatHistory, ChatMessage};
use crate::splitter::TokenCounter;
use crate::store::{ChunkRetriever, VectorStore};

pub const SYSTEM_PROMPT: &str = "You are an expert Homeopathy Doctor. Your goal is to find the best possible remedy from the provided Context.

**DIAGNOSTIC PROCESS & CONSTRAINTS:**
1. **Focus:** Analyze the patient's full symptom set, including the **Chat History**. Only analyze the symptoms explicitly mentioned by the patient. IGNORE any symptoms found *only* in the Context that the patient has not mentioned.
2. **Clarification:** You MUST conclude the diagnosis and suggest a remedy within the first **two or three turns** of the conversation. Ask a MAXIMUM of 3 concise clarifying questions in the first turn only, if needed. In subsequent turns, prioritize diagnosing based on the accumulated history.
3. **Prescription Rule:** **MUST** prescribe the single best-matching remedy when:
   a) You have clear matching symptoms from the Context.
   b) The patient explicitly asks for the medicine, or indicates they cannot answer more questions. In this case, use the best available information from the Chat History to prescribe.
4. **Safety:** If unsure or the context doesn't contain a relevant remedy, admit it honestly.
5. **Tone:** Always be professional, caring, and responsible.
";

/// Outcome of one consultation turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consultation {
    /// Text to show the patient: the doctor's answer or a rendered failure
    pub reply: String,
    /// False when the completion call failed and `reply` describes the failure
    pub succeeded: bool,
}

impl Consultation {
    pub fn answered(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            succeeded: true,
        }
    }

    pub fn failed(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            succeeded: false,
        }
    }
}

/// Anything that can answer a patient given their prior turns
#[async_trait]
pub trait Consultant: Send + Sync {
    /// `Err` means the turn could not run at all (e.g. retrieval failed);
    /// completion failures come back as a failed `Consultation`
    async fn consult(&self, complaint: &str, history: &ChatHistory) -> Result<Consultation>;
}

/// Combine prior patient messages with the new one for retrieval
pub fn compose_retrieval_query(query: &str, history: &ChatHistory) -> String {
    let summary = history.user_messages().collect::<Vec<_>>().join(" ");

    if summary.is_empty() {
        query.to_string()
    } else {
        format!("Patient's case summary: {} {}", summary, query)
    }
}

/// System prompt, prior turns, then book context with the new complaint
pub fn build_messages(query: &str, context: &str, history: &ChatHistory) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend_from_slice(history.messages());
    messages.push(ChatMessage::user(format!(
        "Context from homeopathy book:\n{}\n\nPatient Complaint: {}",
        context, query
    )));
    messages
}

pub struct HomeopathyDoctor {
    store: Arc<dyn ChunkRetriever>,
    embedder: Arc<dyn Embedder>,
    llm: CompletionClient,
    top_k: usize,
    token_counter: Option<TokenCounter>,
}

impl HomeopathyDoctor {
    /// Load the embedder, connect to the vector store and set up the completion client
    pub async fn new(config: &Config) -> Result<Self> {
        let embedder = build_embedder(config).await?;
        let store = VectorStore::connect(config, embedder.dimension()).await?;
        let llm = CompletionClient::new(CompletionSettings::from(config))
            .context("Failed to build completion client")?;

        Ok(Self::from_parts(Arc::new(store), embedder, llm, config.top_k_chunks))
    }

    pub fn from_parts(
        store: Arc<dyn ChunkRetriever>,
        embedder: Arc<dyn Embedder>,
        llm: CompletionClient,
        top_k: usize,
    ) -> Self {
        let token_counter = match TokenCounter::new() {
            Ok(counter) => Some(counter),
            Err(e) => {
                log::warn!("Token counting disabled: {}", e);
                None
            }
        };

        Self {
            store,
            embedder,
            llm,
            top_k,
            token_counter,
        }
    }

    /// Retrieve book passages relevant to the complaint and the patient's history
    pub async fn retrieve_context(&self, query: &str, history: &ChatHistory) -> Result<String> {
        let composite = compose_retrieval_query(query, history);
        log::debug!("Retrieval query: {}", composite);

        let embedding = self
            .embedder
            .embed(&composite)
            .await
            .context("Failed to embed retrieval query")?;

        let chunks = self.store.nearest_chunks(embedding, self.top_k).await?;
        Ok(chunks.join("\n"))
    }
}

#[async_trait]
impl Consultant for HomeopathyDoctor {
    async fn consult(&self, complaint: &str, history: &ChatHistory) -> Result<Consultation> {
        let context = self.retrieve_context(complaint, history).await?;
        let messages = build_messages(complaint, &context, history);

        if let Some(counter) = &self.token_counter {
            let tokens: usize = messages.iter().map(|m| counter.count(&m.content)).sum();
            log::debug!("Prompt has {} messages, ~{} tokens", messages.len(), tokens);
        }

        match self.llm.complete(&messages).await {
            Ok(reply) => Ok(Consultation::answered(reply)),
            Err(e) => {
                log::error!("Completion failed: {}", e);
                Ok(Consultation::failed(e.user_message()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use anyhow::bail;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingEmbedder {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct BookShelf {
        chunks: Option<Vec<String>>,
        requested_k: Mutex<Vec<usize>>,
    }

    impl BookShelf {
        fn with(chunks: &[&str]) -> Self {
            Self {
                chunks: Some(chunks.iter().map(|c| c.to_string()).collect()),
                requested_k: Mutex::new(Vec::new()),
            }
        }

        fn broken() -> Self {
            Self {
                chunks: None,
                requested_k: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChunkRetriever for BookShelf {
        async fn nearest_chunks(&self, _embedding: Vec<f32>, k: usize) -> Result<Vec<String>> {
            self.requested_k.lock().unwrap().push(k);
            match &self.chunks {
                Some(chunks) => Ok(chunks.iter().take(k).cloned().collect()),
                None => bail!("relation \"homeopathy_chunks\" does not exist"),
            }
        }
    }

    fn completion_client(server: &MockServer) -> CompletionClient {
        CompletionClient::new(CompletionSettings {
            api_key: Some("test_key".to_string()),
            api_base: server.base_url(),
            model: "meta-llama/llama-3-8b-instruct".to_string(),
            temperature: 0.2,
            max_tokens: 500,
            timeout: Duration::from_secs(5),
            referer: "https://github.com".to_string(),
            title: "Homeopathy Telegram Bot".to_string(),
        })
        .unwrap()
    }

    fn doctor(
        server: &MockServer,
        shelf: Arc<BookShelf>,
        embedder: Arc<RecordingEmbedder>,
    ) -> HomeopathyDoctor {
        HomeopathyDoctor::from_parts(shelf, embedder, completion_client(server), 4)
    }

    #[tokio::test]
    async fn context_is_top_k_chunks_joined_by_newline() {
        let server = MockServer::start_async().await;
        let shelf = Arc::new(BookShelf::with(&[
            "Belladonna: sudden high fever.",
            "Aconite: fear and restlessness.",
            "Bryonia: worse from motion.",
            "Gelsemium: drowsy and dull.",
            "Nux vomica: irritable, chilly.",
        ]));
        let embedder = Arc::new(RecordingEmbedder::default());
        let doctor = doctor(&server, shelf.clone(), embedder.clone());

        let mut history = ChatHistory::default();
        history.record_turn("high fever", "Since when?");

        let context = doctor.retrieve_context("since last night", &history).await.unwrap();

        assert_eq!(
            context,
            "Belladonna: sudden high fever.\nAconite: fear and restlessness.\nBryonia: worse from motion.\nGelsemium: drowsy and dull."
        );
        assert_eq!(*shelf.requested_k.lock().unwrap(), vec![4]);
        assert_eq!(
            *embedder.texts.lock().unwrap(),
            vec!["Patient's case summary: high fever since last night".to_string()]
        );
    }

    #[tokio::test]
    async fn answered_consultation_carries_model_reply() {
        let server = MockServer::start_async().await;
        let completion_mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "Belladonna 30C." } }]
                }));
            })
            .await;

        let doctor = doctor(
            &server,
            Arc::new(BookShelf::with(&["Belladonna: sudden high fever."])),
            Arc::new(RecordingEmbedder::default()),
        );

        let consultation = doctor.consult("high fever", &ChatHistory::default()).await.unwrap();

        assert_eq!(consultation, Consultation::answered("Belladonna 30C."));
        completion_mock.assert_async().await;
    }

    #[tokio::test]
    async fn completion_errors_become_failed_consultations() {
        for (status, expected) in [(401, "(Error: 401)"), (503, "(Error: 503)")] {
            let server = MockServer::start_async().await;
            server
                .mock_async(|when, then| {
                    when.method(POST).path("/chat/completions");
                    then.status(status)
                        .json_body(json!({ "error": { "message": "upstream said no" } }));
                })
                .await;

            let doctor = doctor(
                &server,
                Arc::new(BookShelf::with(&["Aconite: fear."])),
                Arc::new(RecordingEmbedder::default()),
            );

            let consultation = doctor.consult("panic", &ChatHistory::default()).await.unwrap();

            assert!(!consultation.succeeded);
            assert!(consultation.reply.contains(expected), "{}", consultation.reply);
        }
    }

    #[tokio::test]
    async fn retrieval_errors_propagate_without_calling_the_model() {
        let server = MockServer::start_async().await;
        let completion_mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200);
            })
            .await;

        let doctor = doctor(
            &server,
            Arc::new(BookShelf::broken()),
            Arc::new(RecordingEmbedder::default()),
        );

        let err = doctor.consult("cough", &ChatHistory::default()).await.unwrap_err();

        assert!(err.to_string().contains("does not exist"));
        completion_mock.assert_calls(0);
    }

    #[test]
    fn first_turn_uses_bare_query() {
        let history = ChatHistory::default();
        assert_eq!(compose_retrieval_query("throbbing headache", &history), "throbbing headache");
    }

    #[test]
    fn later_turns_prefix_patient_summary() {
        let mut history = ChatHistory::default();
        history.record_turn("throbbing headache", "Is it worse in light?");
        history.record_turn("yes, worse with light", "Belladonna may help.");

        assert_eq!(
            compose_retrieval_query("and my face is red", &history),
            "Patient's case summary: throbbing headache yes, worse with light and my face is red"
        );
    }

    #[test]
    fn messages_wrap_history_between_system_and_complaint() {
        let mut history = ChatHistory::default();
        history.record_turn("cough at night", "Dry or loose?");

        let messages = build_messages("dry", "Drosera: spasmodic cough.", &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
        assert_eq!(messages[1], ChatMessage::user("cough at night"));
        assert_eq!(messages[2], ChatMessage::assistant("Dry or loose?"));
        assert_eq!(
            messages[3].content,
            "Context from homeopathy book:\nDrosera: spasmodic cough.\n\nPatient Complaint: dry"
        );
    }
}
