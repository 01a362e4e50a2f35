//! DistilBERT sequence classifier running on candle.
//!
//! Expects a Hugging Face repository laid out like
//! `distilbert-base-uncased-finetuned-sst-2-english`: `config.json` with an
//! `id2label` map, `tokenizer.json` and `model.safetensors` holding the
//! `distilbert.*`, `pre_classifier.*` and `classifier.*` tensors.
//!
//! Inference is CPU only and one sequence at a time, truncated to
//! `max_tokens`. With `reduced_precision` the weights are mapped as f16; if a
//! warm-up pass fails in f16 the model is reloaded in f32.

use crate::model::{LoadOptions, ModelError, RawPrediction, SentimentModel};
use anyhow::anyhow;
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};
use candle_transformers::models::distilbert::{Config, DistilBertModel};
use hf_hub::api::sync::Api;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{info, warn};

const WARMUP_TEXT: &str = "warm up";

/// Fields of `config.json` that candle's `Config` keeps private.
#[derive(Debug, Deserialize)]
struct HeadConfig {
    #[serde(default = "default_dim")]
    dim: usize,
    #[serde(default)]
    id2label: HashMap<String, String>,
}

fn default_dim() -> usize {
    768
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

pub struct DistilBertSentiment {
    name: String,
    encoder: DistilBertModel,
    pre_classifier: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    labels: Vec<String>,
    device: Device,
}

fn fetch_error(model: &str, err: impl Display) -> ModelError {
    ModelError::Fetch {
        model: model.to_string(),
        reason: err.to_string(),
    }
}

fn load_error(err: impl Display) -> ModelError {
    ModelError::Load(err.to_string())
}

fn fetch_files(model_name: &str) -> Result<ModelFiles, ModelError> {
    let api = Api::new().map_err(|e| fetch_error(model_name, e))?;
    let repo = api.model(model_name.to_string());
    let get = |file: &str| repo.get(file).map_err(|e| fetch_error(model_name, e));

    Ok(ModelFiles {
        config: get("config.json")?,
        tokenizer: get("tokenizer.json")?,
        weights: get("model.safetensors")?,
    })
}

/// Label names in class-index order.
fn ordered_labels(id2label: &HashMap<String, String>) -> Vec<String> {
    if id2label.is_empty() {
        return vec!["NEGATIVE".to_string(), "POSITIVE".to_string()];
    }
    (0..id2label.len())
        .map(|i| {
            id2label
                .get(&i.to_string())
                .cloned()
                .unwrap_or_else(|| format!("LABEL_{}", i))
        })
        .collect()
}

impl DistilBertSentiment {
    pub fn load(options: &LoadOptions) -> Result<Self, ModelError> {
        let files = fetch_files(&options.model_name)?;

        let dtype = if options.reduced_precision { DType::F16 } else { DType::F32 };
        let model = Self::from_files(&options.model_name, &files, options.max_tokens, dtype)?;
        match model.forward(WARMUP_TEXT) {
            Ok(_) => Ok(model),
            Err(e) if dtype != DType::F32 => {
                warn!(error = %e, "warm-up failed in {:?}, reloading as f32", dtype);
                drop(model);
                let model = Self::from_files(&options.model_name, &files, options.max_tokens, DType::F32)?;
                model.forward(WARMUP_TEXT).map_err(load_error)?;
                Ok(model)
            }
            Err(e) => Err(load_error(e)),
        }
    }

    fn from_files(
        name: &str,
        files: &ModelFiles,
        max_tokens: usize,
        dtype: DType,
    ) -> Result<Self, ModelError> {
        let raw_config = std::fs::read_to_string(&files.config).map_err(load_error)?;
        let config: Config = serde_json::from_str(&raw_config).map_err(load_error)?;
        let head: HeadConfig = serde_json::from_str(&raw_config).map_err(load_error)?;
        let labels = ordered_labels(&head.id2label);

        let tokenizer = load_tokenizer(&files.tokenizer, max_tokens)?;

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights.as_path()], dtype, &device)
                .map_err(load_error)?
        };
        let encoder = DistilBertModel::load(vb.pp("distilbert"), &config).map_err(load_error)?;
        let pre_classifier = linear(head.dim, head.dim, vb.pp("pre_classifier")).map_err(load_error)?;
        let classifier = linear(head.dim, labels.len(), vb.pp("classifier")).map_err(load_error)?;

        info!(model = %name, dtype = ?dtype, labels = ?labels, "transformer weights mapped");

        Ok(Self {
            name: name.to_string(),
            encoder,
            pre_classifier,
            classifier,
            tokenizer,
            labels,
            device,
        })
    }

    fn forward(&self, text: &str) -> anyhow::Result<RawPrediction> {
        let encoding = self.tokenizer.encode(text, true).map_err(anyhow::Error::msg)?;
        let ids = encoding.get_ids();
        let seq_len = ids.len();

        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        // single unpadded sequence: nothing is masked out
        let mask = Tensor::zeros((seq_len, seq_len), DType::U8, &self.device)?;

        let hidden = self.encoder.forward(&input_ids, &mask)?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pre_classifier.forward(&cls)?.relu()?;
        let logits = self.classifier.forward(&pooled)?.to_dtype(DType::F32)?;
        let probs: Vec<f32> = candle_nn::ops::softmax(&logits, D::Minus1)?
            .squeeze(0)?
            .to_vec1()?;

        let (index, score) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| anyhow!("model produced no logits"))?;
        let label = self
            .labels
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("class index {} has no label", index))?;

        Ok(RawPrediction { label, score })
    }
}

fn load_tokenizer(path: &Path, max_tokens: usize) -> Result<Tokenizer, ModelError> {
    let mut tokenizer = Tokenizer::from_file(path).map_err(load_error)?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_tokens,
            ..Default::default()
        }))
        .map_err(load_error)?;
    tokenizer.with_padding(None);
    Ok(tokenizer)
}

impl SentimentModel for DistilBertSentiment {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, text: &str) -> Result<RawPrediction, ModelError> {
        self.forward(text).map_err(|e| ModelError::Inference(e.to_string()))
    }
}
