/// Completion endpoint smoke test
///
/// Lists the models the endpoint advertises, then sends a one-line prompt to
/// each candidate model and reports which ones answer.
///
/// Run with: cargo run --bin check_models -- --model deepseek/deepseek-chat

use anyhow::Result;
use clap::Parser;
use homeopathy_doctor_bot::config::{Config, Requirements};
use homeopathy_doctor_bot::llm::{CompletionClient, CompletionError, CompletionSettings};
use homeopathy_doctor_bot::session::ChatMessage;

const CANDIDATE_MODELS: &[&str] = &[
    "deepseek/deepseek-chat",
    "deepseek/deepseek-coder",
    "deepseek/deepseek-llm-67b-chat",
    "deepseek/deepseek-llm-7b-chat",
    "google/gemma-7b-it:free",
    "microsoft/wizardlm-2-8x22b:free",
    "meta-llama/llama-3-8b-instruct:free",
    "meta-llama/llama-3-70b-instruct:free",
    "qwen/qwen-2-7b-instruct:free",
    "mistralai/mistral-7b-instruct:free",
    "google/gemma-7b-it",
    "meta-llama/llama-3-8b-instruct",
];

const PING_PROMPT: &str = "Hello! Please respond with just 'OK' to confirm connection.";

#[derive(Parser, Debug)]
#[command(name = "check_models", about = "Find chat models that answer through the configured API key")]
struct Args {
    /// Model to test (repeatable); defaults to a built-in candidate list
    #[arg(long = "model")]
    models: Vec<String>,
}

/// Ping one model and describe the outcome on a single line
async fn test_model_connection(client: &CompletionClient, model: &str) -> (bool, String) {
    let messages = [ChatMessage::user(PING_PROMPT)];

    match client.complete_with(model, &messages, 0.1, 10).await {
        Ok(reply) => (true, format!("✅ {} - SUCCESS: {}", model, reply.trim())),
        Err(CompletionError::Transport(e)) => (false, format!("❌ {} - ERROR: {}", model, e)),
        Err(CompletionError::Api { message, .. }) | Err(CompletionError::Unauthorized(message)) => {
            (false, format!("❌ {} - FAILED: {}", model, message))
        }
        Err(e) => (false, format!("❌ {} - FAILED: {}", model, e)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    println!("🚀 Connection Test - Finding Available Models");
    println!("{}", "=".repeat(60));

    let mut config = Config::from_env()?;
    config.app_title = "Homeopathy AI Doctor Test".to_string();

    if let Err(e) = config.check_dependencies(Requirements::model_check()).await {
        println!("❌ ERROR: {}", e);
        return Ok(());
    }

    let key_prefix: String = config
        .openrouter_api_key
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(10)
        .collect();
    println!("✅ API Key found (starts with): {}...", key_prefix);

    let client = CompletionClient::new(CompletionSettings::from(&config))?;

    println!("\n🔍 Fetching available models...");
    match client.list_models().await {
        Ok(models) if !models.is_empty() => println!("✅ Found {} total models", models.len()),
        Ok(_) => {
            println!("❌ Could not fetch models list");
            return Ok(());
        }
        Err(e) => {
            println!("❌ Could not fetch models list ({})", e);
            return Ok(());
        }
    }

    let candidates: Vec<String> = if args.models.is_empty() {
        CANDIDATE_MODELS.iter().map(|m| m.to_string()).collect()
    } else {
        args.models
    };

    println!("\n🧪 Testing potential models...");
    println!("{}", "-".repeat(60));

    let mut working = Vec::new();
    for model in &candidates {
        let (ok, line) = test_model_connection(&client, model).await;
        println!("{}", line);
        if ok && !working.contains(model) {
            working.push(model.clone());
        }
    }

    println!("\n{}", "=".repeat(60));
    if working.is_empty() {
        println!("💡 No models worked. Try these solutions:");
        println!("1. Check your account at https://openrouter.ai/");
        println!("2. Some models might require sign-in or have usage limits");
        println!("3. Try models without the ':free' suffix");
        println!("4. Consider using a different API provider (LLM_API_BASE)");
    } else {
        println!("🎉 WORKING MODELS FOUND:");
        for model in &working {
            println!("   ✅ {}", model);
        }
        println!("\n💡 Set CHAT_MODEL to one of these models");
    }

    Ok(())
}
