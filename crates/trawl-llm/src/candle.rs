//! In-process sentence embeddings: a BERT-family model run by candle, mean-pooled and
//! L2-normalised.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Metal or CUDA when compiled in and available, CPU otherwise.
#[must_use]
pub fn detect_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(d) = Device::new_metal(0) {
            return d;
        }
    }
    #[cfg(feature = "cuda")]
    {
        if let Ok(d) = Device::new_cuda(0) {
            return d;
        }
    }
    Device::Cpu
}

/// Files making up a sentence-transformer checkpoint.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn download(repo_id: &str) -> Result<Self, LlmError> {
        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| LlmError::ModelLoad(format!("hf-hub client: {e}")))?;
        let repo = api.model(repo_id.to_owned());
        let get = |name: &str| {
            repo.get(name)
                .map_err(|e| LlmError::ModelLoad(format!("{repo_id}/{name}: {e}")))
        };
        Ok(Self {
            config: get("config.json")?,
            tokenizer: get("tokenizer.json")?,
            weights: get("model.safetensors")?,
        })
    }
}

#[derive(Clone)]
pub struct CandleEmbedder {
    model: Arc<BertModel>,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    dimension: usize,
}

impl std::fmt::Debug for CandleEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleEmbedder")
            .field("device", &self.device)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl CandleEmbedder {
    /// Fetch `repo_id` from the `HuggingFace` hub (or its local cache) and load it on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be downloaded or the checkpoint does not load.
    pub fn load(repo_id: &str, device: &Device) -> Result<Self, LlmError> {
        let files = ModelFiles::download(repo_id)?;
        let embedder = Self::from_files(&files, device)?;
        tracing::info!(repo_id, dimension = embedder.dimension, "local embedding model loaded");
        Ok(embedder)
    }

    /// [`load`](Self::load) on the best device this build supports.
    ///
    /// # Errors
    ///
    /// Returns an error if model download or loading fails.
    pub fn load_detected(repo_id: &str) -> Result<Self, LlmError> {
        Self::load(repo_id, &detect_device())
    }

    fn from_files(files: &ModelFiles, device: &Device) -> Result<Self, LlmError> {
        let config: BertConfig = serde_json::from_str(&read(&files.config)?)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| LlmError::ModelLoad(format!("tokenizer: {e}")))?;

        // SAFETY: the safetensors file lives in the hf-hub cache and is not modified while
        // the memory map is alive.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, device)?
        };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            device: device.clone(),
            dimension: config.hidden_size,
        })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| LlmError::Inference(format!("tokenize: {e}")))?;
        let ids = encoding.get_ids();
        let type_ids = vec![0_u32; ids.len()];

        let input = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let token_types = Tensor::new(type_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let hidden = self.model.forward(&input, &token_types, None)?;
        pool(&hidden)
    }
}

fn read(path: &Path) -> Result<String, LlmError> {
    std::fs::read_to_string(path)
        .map_err(|e| LlmError::ModelLoad(format!("{}: {e}", path.display())))
}

/// Mean over the token axis of a `[1, tokens, hidden]` tensor, scaled to unit length.
fn pool(hidden: &Tensor) -> Result<Vec<f32>, LlmError> {
    let mean = hidden.mean(1)?;
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?;
    Ok(mean.broadcast_div(&norm)?.squeeze(0)?.to_vec1::<f32>()?)
}

impl EmbeddingProvider for CandleEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "candle"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let this = self.clone();
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || this.embed_one(&text))
            .await
            .map_err(|e| LlmError::Inference(format!("embedding task panicked: {e}")))?
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let this = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || texts.iter().map(|t| this.embed_one(t)).collect())
            .await
            .map_err(|e| LlmError::Inference(format!("embedding task panicked: {e}")))?
    }
}
