/// Embedding backends
///
/// Both backends turn text into a vector through a library or API call:
/// - `LocalEmbedder` runs sentence-transformers/all-MiniLM-L6-v2 in-process with candle
/// - `OpenAiEmbedder` calls any OpenAI-compatible `/embeddings` endpoint

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};

use crate::config::{Config, EmbeddingBackend};

/// all-MiniLM-L6-v2 was trained with sequences of at most 256 word pieces
const LOCAL_MAX_SEQUENCE: usize = 256;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single piece of text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of the vectors this embedder produces
    fn dimension(&self) -> usize;
}

/// The part of a model's `config.json` that fixes the output vector size
#[derive(Debug, Deserialize)]
struct ModelShape {
    hidden_size: usize,
}

/// Width of the pooled sentence vector for a BERT `config.json`
fn hidden_size(config_json: &str) -> Result<usize> {
    let shape: ModelShape = serde_json::from_str(config_json)
        .context("Embedding model config has no hidden_size")?;
    Ok(shape.hidden_size)
}

/// Sentence embeddings model using Candle
struct SentenceModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceModel {
    /// Download (or reuse from the hub cache) and load the model
    fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().context("Failed to create Hugging Face hub client")?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json")?;
        let tokenizer_filename = api_repo.get("tokenizer.json")?;
        let weights_filename = api_repo.get("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let dimension = hidden_size(&config)?;
        let config: BertConfig = serde_json::from_str(&config)
            .context("Failed to parse embedding model config")?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: LOCAL_MAX_SEQUENCE,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to configure tokenizer truncation: {}", e))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization error: {}", e))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;

        // mean pooling over non-padding tokens: [1, seq, hidden] -> [hidden]
        let mask = Tensor::new(tokens.get_attention_mask(), &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;
        let summed = output.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        let mean = summed.broadcast_div(&count)?.squeeze(0)?;

        let norm = mean.sqr()?.sum_all()?.sqrt()?;
        let normalized = mean.broadcast_div(&norm)?;

        Ok(normalized.to_vec1::<f32>()?)
    }
}

/// all-MiniLM-L6-v2 run locally
pub struct LocalEmbedder {
    model: Arc<SentenceModel>,
    dimension: usize,
}

impl LocalEmbedder {
    /// Load the model; the vector size comes from the model's own config
    pub async fn load(model_id: &str) -> Result<Self> {
        log::info!("Loading local embedding model {}...", model_id);

        let id = model_id.to_string();
        let model = tokio::task::spawn_blocking(move || SentenceModel::load(&id))
            .await
            .context("Embedding model loader panicked")??;

        log::info!("Embedding model ready ({} dimensions)", model.dimension);
        Ok(Self {
            dimension: model.dimension,
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        tokio::task::spawn_blocking(move || model.encode(&text))
            .await
            .context("Embedding task panicked")?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embeddings from an OpenAI-compatible HTTP API
pub struct OpenAiEmbedder {
    http_client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: text,
            model: &self.model,
        };

        let mut builder = self
            .http_client
            .post(format!("{}/embeddings", self.api_base))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(anyhow!(
                "Embedding API error (status {}): {}",
                status,
                error_text
            ));
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read response body")?;

        let response: EmbeddingResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse embedding response. Response was: {}", response_text))?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("No embedding returned")
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Build the embedder selected by `EMBEDDING_BACKEND`
pub async fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding_backend {
        EmbeddingBackend::Local => {
            let embedder = LocalEmbedder::load(&config.embedding_model).await?;
            if embedder.dimension() != config.embedding_dimension {
                log::warn!(
                    "EMBEDDING_DIMENSION is {} but {} produces {}-dimensional vectors; using the model's size",
                    config.embedding_dimension,
                    config.embedding_model,
                    embedder.dimension()
                );
            }
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::OpenAi => {
            log::info!("Using remote embeddings ({})", config.embedding_model);
            Ok(Arc::new(OpenAiEmbedder::new(
                config.embedding_api_base.clone(),
                config.embedding_api_key.clone(),
                config.embedding_model.clone(),
                config.embedding_dimension,
            )))
        }
    }
}
