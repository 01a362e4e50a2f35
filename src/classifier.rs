//! Adaptive sentiment dispatcher.
//!
//! On the first classification request the dispatcher decides, once for the
//! lifetime of the process, whether it can run the transformer model:
//!
//! 1. `lightweight_mode` forces the lexical fallback without probing anything.
//! 2. Available memory below `memory_threshold_mb` forces the fallback.
//! 3. Otherwise the model is loaded; any load error forces the fallback.
//!
//! With a model loaded, texts are truncated to `max_text_length` characters
//! and classified one by one. An item the model fails on is classified by
//! [`crate::ml::classify`] on its full text; a batch the model refuses as a
//! whole is classified entirely by the fallback. Callers always get one
//! prediction per input, in input order.

use crate::memory::{MemoryProbe, SystemMemory};
use crate::ml::{self, Label, Prediction};
use crate::model::{DefaultLoader, LoadOptions, ModelLoader, SentimentModel};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

pub const DEFAULT_MODEL_NAME: &str = "distilbert-base-uncased-finetuned-sst-2-english";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Skip the model entirely.
    pub lightweight_mode: bool,
    pub model_name: String,
    /// Characters kept per text before inference.
    pub max_text_length: usize,
    /// Minimum available memory (MiB) required to attempt a model load.
    pub memory_threshold_mb: u64,
    /// Tokenizer truncation length handed to the loader.
    pub max_tokens: usize,
    pub reduced_precision: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            lightweight_mode: false,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            max_text_length: 500,
            memory_threshold_mb: 400,
            max_tokens: 128,
            reduced_precision: true,
        }
    }
}

impl ClassifierConfig {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            model_name: self.model_name.clone(),
            max_tokens: self.max_tokens,
            reduced_precision: self.reduced_precision,
            batch_size: 1,
        }
    }
}

/// Why a text was not classified by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    LightweightMode,
    InsufficientMemory { available_mb: u64, threshold_mb: u64 },
    LoadFailed(String),
    ItemFailed(String),
    BatchFailed(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::LightweightMode => write!(f, "lightweight mode enabled"),
            FallbackReason::InsufficientMemory { available_mb, threshold_mb } => write!(
                f,
                "not enough memory ({}MB available, {}MB required)",
                available_mb, threshold_mb
            ),
            FallbackReason::LoadFailed(e) => write!(f, "model load failed: {}", e),
            FallbackReason::ItemFailed(e) => write!(f, "item inference failed: {}", e),
            FallbackReason::BatchFailed(e) => write!(f, "batch inference failed: {}", e),
        }
    }
}

/// Per-item result before it is collapsed to a plain [`Prediction`].
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Model(Prediction),
    Fallback(FallbackReason),
}

enum Backend {
    Model(Box<dyn SentimentModel>),
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierState {
    Uninitialized,
    ModelLoaded,
    FallbackOnly,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClassifierStatus {
    pub state: ClassifierState,
    /// Loaded model, when there is one.
    pub model_name: Option<String>,
    /// Why the fallback is in use.
    pub reason: Option<String>,
}

pub struct SentimentClassifier {
    config: ClassifierConfig,
    probe: Box<dyn MemoryProbe>,
    loader: Box<dyn ModelLoader>,
    backend: OnceCell<Backend>,
}

impl SentimentClassifier {
    /// Dispatcher probing system memory and loading the compiled-in model.
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_parts(config, Box::new(SystemMemory), Box::new(DefaultLoader))
    }

    pub fn with_parts(
        config: ClassifierConfig,
        probe: Box<dyn MemoryProbe>,
        loader: Box<dyn ModelLoader>,
    ) -> Self {
        Self {
            config,
            probe,
            loader,
            backend: OnceCell::new(),
        }
    }

    /// Current state. Does not trigger initialization.
    pub fn status(&self) -> ClassifierStatus {
        match self.backend.get() {
            None => ClassifierStatus {
                state: ClassifierState::Uninitialized,
                model_name: None,
                reason: None,
            },
            Some(Backend::Model(model)) => ClassifierStatus {
                state: ClassifierState::ModelLoaded,
                model_name: Some(model.name().to_string()),
                reason: None,
            },
            Some(Backend::Fallback(reason)) => ClassifierStatus {
                state: ClassifierState::FallbackOnly,
                model_name: None,
                reason: Some(reason.to_string()),
            },
        }
    }

    /// Classifies every text. Never fails; the output has the input's length and order.
    pub fn predict<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Prediction> {
        match self.backend() {
            Backend::Model(model) => self.predict_with_model(model.as_ref(), texts),
            Backend::Fallback(_) => ml::classify_batch(texts),
        }
    }

    pub fn classify_one(&self, text: &str) -> Prediction {
        self.predict(&[text])
            .pop()
            .unwrap_or_else(|| ml::classify(text))
    }

    fn backend(&self) -> &Backend {
        self.backend.get_or_init(|| {
            let backend = self.resolve();
            match &backend {
                Backend::Model(model) => info!(model = %model.name(), "sentiment model loaded"),
                Backend::Fallback(reason) => {
                    warn!(reason = %reason, "sentiment model unavailable, using lexical fallback")
                }
            }
            backend
        })
    }

    fn resolve(&self) -> Backend {
        if self.config.lightweight_mode {
            return Backend::Fallback(FallbackReason::LightweightMode);
        }

        match self.probe.available_mb() {
            Some(available_mb) if available_mb < self.config.memory_threshold_mb => {
                return Backend::Fallback(FallbackReason::InsufficientMemory {
                    available_mb,
                    threshold_mb: self.config.memory_threshold_mb,
                });
            }
            Some(available_mb) => debug!(available_mb, "memory check passed"),
            None => debug!("available memory unknown, attempting model load"),
        }

        match self.loader.load(&self.config.load_options()) {
            Ok(model) => Backend::Model(model),
            Err(e) => Backend::Fallback(FallbackReason::LoadFailed(e.to_string())),
        }
    }

    fn predict_with_model<S: AsRef<str>>(
        &self,
        model: &dyn SentimentModel,
        texts: &[S],
    ) -> Vec<Prediction> {
        if let Err(e) = model.begin_batch(texts.len()) {
            let reason = FallbackReason::BatchFailed(e.to_string());
            warn!(reason = %reason, items = texts.len(), "falling back for whole batch");
            return ml::classify_batch(texts);
        }

        let mut fallbacks = 0usize;
        let predictions: Vec<Prediction> = texts
            .iter()
            .map(|text| {
                let text = text.as_ref();
                let truncated = truncate_chars(text, self.config.max_text_length);
                match infer(model, truncated) {
                    Outcome::Model(prediction) => prediction,
                    Outcome::Fallback(reason) => {
                        fallbacks += 1;
                        debug!(reason = %reason, "item classified by fallback");
                        ml::classify(text)
                    }
                }
            })
            .collect();

        model.release_buffers();

        if fallbacks > 0 {
            warn!(fallbacks, items = texts.len(), "some items were classified by the fallback");
        }
        predictions
    }
}

fn infer(model: &dyn SentimentModel, text: &str) -> Outcome {
    match model.predict(text) {
        Ok(raw) if raw.score.is_finite() => Outcome::Model(Prediction {
            label: Label::from_raw(&raw.label),
            score: raw.score.clamp(0.0, 1.0),
        }),
        Ok(raw) => Outcome::Fallback(FallbackReason::ItemFailed(format!(
            "non-finite score {}",
            raw.score
        ))),
        Err(e) => Outcome::Fallback(FallbackReason::ItemFailed(e.to_string())),
    }
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
