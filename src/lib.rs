/// Homeopathy Doctor Bot Library
///
/// This library provides the core functionality for the homeopathy assistant:
/// book ingestion, retrieval over the vector store, the chat-completion client,
/// conversation history, and the terminal and Telegram front ends.

pub mod bot;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod handlers;
pub mod llm;
pub mod loader;
pub mod rag;
pub mod session;
pub mod splitter;
pub mod store;
