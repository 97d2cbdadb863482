/// Ingest a homeopathy book into the vector store
///
/// Loads the PDF page by page, splits it into overlapping chunks, embeds
/// every chunk and upserts it into PostgreSQL.
///
/// Run with: cargo run --bin ingest_book -- --pdf homeopathy_book.pdf

use anyhow::{Context, Result};
use clap::Parser;
use homeopathy_doctor_bot::config::Config;
use homeopathy_doctor_bot::embeddings::build_embedder;
use homeopathy_doctor_bot::loader::load_pdf;
use homeopathy_doctor_bot::splitter::{
    RecursiveCharacterSplitter, TextChunk, TokenCounter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
use homeopathy_doctor_bot::store::VectorStore;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "ingest_book", about = "Load a homeopathy PDF into the vector store")]
struct Args {
    /// PDF to ingest
    #[arg(long, default_value = "homeopathy_book.pdf")]
    pdf: String,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared between neighbouring chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Delete previously stored chunks before ingesting
    #[arg(long)]
    reset: bool,
}

fn chunk_id(stem: &str, chunk: &TextChunk) -> String {
    format!("{}_{}_{}", stem, chunk.page, chunk.start_index)
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = Config::from_env()?;
    let splitter = RecursiveCharacterSplitter::new(args.chunk_size, args.chunk_overlap)?;

    println!("📖 Loading {}...", args.pdf);
    let pages = load_pdf(&args.pdf)?;

    println!("✂️  Splitting text into chunks...");
    let chunks = splitter.split_documents(&pages);

    let total_tokens = TokenCounter::new()
        .map(|counter| chunks.iter().map(|c| counter.count(&c.content)).sum::<usize>())
        .unwrap_or_default();

    println!(
        "🧠 Creating memory database with {} chunks (~{} tokens)...",
        chunks.len(),
        total_tokens
    );

    let embedder = build_embedder(&config).await?;
    let store = VectorStore::connect(&config, embedder.dimension()).await?;
    store.initialize_collection().await?;

    if args.reset {
        let removed = store.reset().await?;
        println!("🗑  Removed {} previously stored chunks", removed);
    }

    let stem = Path::new(&args.pdf)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "book".to_string());

    for (idx, chunk) in chunks.iter().enumerate() {
        let embedding = embedder
            .embed(&chunk.content)
            .await
            .with_context(|| format!("Failed to embed chunk {} (page {})", idx, chunk.page))?;

        let metadata = serde_json::json!({
            "source": chunk.source,
            "page": chunk.page,
            "start_index": chunk.start_index,
        });

        store
            .upsert_chunk(&chunk_id(&stem, chunk), &chunk.content, embedding, metadata)
            .await?;

        if (idx + 1) % 50 == 0 {
            log::info!("Stored {}/{} chunks", idx + 1, chunks.len());
        }
    }

    println!(
        "✅ Ingestion complete! {} chunks stored in table '{}'.",
        store.count().await?,
        store.table()
    );

    Ok(())
}
