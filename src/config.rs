//! Environment-driven settings.
//!
//! `.env` is loaded by the binary before [`Settings::from_env`] runs; every
//! variable falls back to a default when unset or unparsable.

use crate::classifier::{ClassifierConfig, DEFAULT_MODEL_NAME};
use crate::memory::{FixedMemory, MemoryProbe, SystemMemory};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Settings {
    pub omdb_api_key: Option<String>,
    pub tmdb_api_key: Option<String>,
    pub data_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub bind_addr: String,
    /// Replaces the OS memory reading, e.g. with a container limit.
    pub available_memory_mb: Option<u64>,
    pub classifier: ClassifierConfig,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ClassifierConfig::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = match (get("BIND_ADDR"), get("PORT")) {
            (Some(addr), _) => addr,
            (None, Some(port)) => format!("0.0.0.0:{}", port),
            (None, None) => "0.0.0.0:3000".to_string(),
        };

        let classifier = ClassifierConfig {
            lightweight_mode: get("LIGHTWEIGHT_MODE").map(|v| parse_flag(&v)).unwrap_or(false),
            model_name: get("HF_MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            max_text_length: parse_or(get("SENTIMENT_MAX_TEXT_LENGTH"), defaults.max_text_length),
            memory_threshold_mb: parse_or(get("SENTIMENT_MEMORY_THRESHOLD_MB"), defaults.memory_threshold_mb),
            max_tokens: parse_or(get("SENTIMENT_MAX_TOKENS"), defaults.max_tokens),
            reduced_precision: get("SENTIMENT_REDUCED_PRECISION")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.reduced_precision),
        };

        Self {
            omdb_api_key: get("OMDB_API_KEY"),
            tmdb_api_key: get("TMDB_API_KEY"),
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "data".to_string())),
            frontend_dir: PathBuf::from(get("FRONTEND_DIR").unwrap_or_else(|| "frontend".to_string())),
            bind_addr,
            available_memory_mb: get("SENTIMENT_AVAILABLE_MB").and_then(|v| v.parse().ok()),
            classifier,
        }
    }

    pub fn memory_probe(&self) -> Box<dyn MemoryProbe> {
        match self.available_memory_mb {
            Some(mb) => Box::new(FixedMemory(Some(mb))),
            None => Box::new(SystemMemory),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
