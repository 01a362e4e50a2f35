//! Seams between the dispatcher and a learned sentiment model.
//!
//! A [`ModelLoader`] builds a [`SentimentModel`] once per process; the model
//! is then asked for one text at a time.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("transformer support not compiled in (build with --features transformer)")]
    NotCompiled,
    #[error("failed to fetch {model}: {reason}")]
    Fetch { model: String, reason: String },
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Un-normalized model output. Labels are whatever the model's head calls them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub label: String,
    pub score: f32,
}

/// Memory-conscious settings a loader must honour.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Hugging Face repository id.
    pub model_name: String,
    /// Tokenizer truncation length.
    pub max_tokens: usize,
    /// Load weights as f16 instead of f32.
    pub reduced_precision: bool,
    /// Items per forward pass. The dispatcher always feeds one.
    pub batch_size: usize,
}

pub trait SentimentModel: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before any item of a batch is classified. An error here fails
    /// the whole batch.
    fn begin_batch(&self, _len: usize) -> Result<(), ModelError> {
        Ok(())
    }

    fn predict(&self, text: &str) -> Result<RawPrediction, ModelError>;

    /// Drops transient inference state once a batch is finished.
    fn release_buffers(&self) {}
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, options: &LoadOptions) -> Result<Box<dyn SentimentModel>, ModelError>;
}

/// Loads the DistilBERT backend when it is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLoader;

impl ModelLoader for DefaultLoader {
    fn load(&self, options: &LoadOptions) -> Result<Box<dyn SentimentModel>, ModelError> {
        #[cfg(feature = "transformer")]
        {
            let model = crate::transformer::DistilBertSentiment::load(options)?;
            Ok(Box::new(model))
        }

        #[cfg(not(feature = "transformer"))]
        {
            tracing::debug!(model = %options.model_name, "transformer feature disabled");
            Err(ModelError::NotCompiled)
        }
    }
}
