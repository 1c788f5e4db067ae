//! Locating model files on disk or on the Hugging Face hub

use crate::config::CandleEngineConfig;
use polysent_core::{Error, ModelId, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILES: &[&str] = &["tokenizer.json", "vocab.txt"];
const OPTIONAL_FILES: &[&str] = &["tokenizer_config.json", "special_tokens_map.json"];

/// On-disk format of the model weights, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsFormat {
    /// `model.safetensors`, memory-mapped
    Safetensors,
    /// `pytorch_model.bin`, read through candle's pickle loader
    Pytorch,
}

impl WeightsFormat {
    const ALL: [Self; 2] = [Self::Safetensors, Self::Pytorch];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Safetensors => "model.safetensors",
            Self::Pytorch => "pytorch_model.bin",
        }
    }
}

/// Directory containing `config.json`, weights and tokenizer files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    dir: PathBuf,
    format: WeightsFormat,
}

impl ModelFiles {
    /// Use a local model directory
    pub fn local(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        check(&dir)?;
        let format = WeightsFormat::ALL
            .into_iter()
            .find(|format| dir.join(format.file_name()).exists())
            .ok_or_else(|| {
                Error::engine_load(format!(
                    "No weights found in {} (tried model.safetensors, pytorch_model.bin)",
                    dir.display()
                ))
            })?;
        Ok(Self { dir, format })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn weights(&self) -> PathBuf {
        self.dir.join(self.format.file_name())
    }

    pub fn format(&self) -> WeightsFormat {
        self.format
    }
}

fn check(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::engine_load(format!(
            "Model path does not exist: {}",
            dir.display()
        )));
    }
    if !dir.join(CONFIG_FILE).exists() {
        return Err(Error::engine_load(format!(
            "{} not found in {}",
            CONFIG_FILE,
            dir.display()
        )));
    }
    if !TOKENIZER_FILES.iter().any(|file| dir.join(file).exists()) {
        return Err(Error::engine_load(format!(
            "No tokenizer found in {} (tried tokenizer.json, vocab.txt)",
            dir.display()
        )));
    }
    Ok(())
}

/// Resolve a model identifier to its files.
///
/// An identifier naming an existing directory is used as is; anything else
/// is treated as a hub repository and downloaded into the cache. Blocking.
pub fn resolve(model: &ModelId, config: &CandleEngineConfig) -> Result<ModelFiles> {
    let path = Path::new(model.as_str());
    if path.is_dir() {
        debug!(path = %path.display(), "Using local model directory");
        return ModelFiles::local(path);
    }
    download(model, config)
}

fn download(model: &ModelId, config: &CandleEngineConfig) -> Result<ModelFiles> {
    info!(model = %model, "Fetching model from Hugging Face");

    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_cache_dir(config.resolved_cache_dir())
        .with_progress(false)
        .build()
        .map_err(|e| Error::engine_load(format!("Failed to initialize HuggingFace API: {}", e)))?;

    let repo = match &config.revision {
        Some(revision) => hf_hub::Repo::with_revision(
            model.to_string(),
            hf_hub::RepoType::Model,
            revision.clone(),
        ),
        None => hf_hub::Repo::model(model.to_string()),
    };
    let repo = api.repo(repo);

    let config_path = repo
        .get(CONFIG_FILE)
        .map_err(|e| Error::engine_load(format!("Failed to download {}: {}", CONFIG_FILE, e)))?;

    let mut format = None;
    let mut errors = Vec::new();
    for candidate in WeightsFormat::ALL {
        match repo.get(candidate.file_name()) {
            Ok(_) => {
                format = Some(candidate);
                break;
            }
            Err(e) => errors.push(format!("{}: {}", candidate.file_name(), e)),
        }
    }
    let format = format.ok_or_else(|| {
        Error::engine_load(format!(
            "Failed to download weights for {} [{}]",
            model,
            errors.join(" | ")
        ))
    })?;
    debug!(file = format.file_name(), "Downloaded weights");

    let mut found_tokenizer = false;
    for file in TOKENIZER_FILES {
        if repo.get(file).is_ok() {
            debug!(file, "Found tokenizer file");
            found_tokenizer = true;
            break;
        }
    }
    if !found_tokenizer {
        return Err(Error::engine_load(format!(
            "No tokenizer found for {} (tried tokenizer.json, vocab.txt)",
            model
        )));
    }
    for file in OPTIONAL_FILES {
        if repo.get(file).is_err() {
            debug!(file, "Optional file not present");
        }
    }

    let dir = config_path
        .parent()
        .ok_or_else(|| Error::engine_load("Invalid cache path"))?
        .to_path_buf();

    info!(model = %model, path = %dir.display(), "Model available");
    Ok(ModelFiles { dir, format })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_model_dir(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            fs::write(dir.path().join(file), b"{}").unwrap();
        }
        dir
    }

    #[test]
    fn test_local_model_dir() {
        let dir = write_model_dir(&["config.json", "model.safetensors", "vocab.txt"]);

        let files = ModelFiles::local(dir.path()).unwrap();

        assert_eq!(files.dir(), dir.path());
        assert_eq!(files.config(), dir.path().join("config.json"));
        assert_eq!(files.format(), WeightsFormat::Safetensors);
    }

    #[test]
    fn test_pytorch_weights_fallback() {
        let dir = write_model_dir(&["config.json", "pytorch_model.bin", "tokenizer.json"]);

        let files = ModelFiles::local(dir.path()).unwrap();

        assert_eq!(files.format(), WeightsFormat::Pytorch);
        assert_eq!(files.weights(), dir.path().join("pytorch_model.bin"));
    }

    #[test]
    fn test_safetensors_preferred_over_pytorch() {
        let dir = write_model_dir(&["config.json", "model.safetensors", "pytorch_model.bin", "vocab.txt"]);

        let files = ModelFiles::local(dir.path()).unwrap();

        assert_eq!(files.format(), WeightsFormat::Safetensors);
    }

    #[test]
    fn test_local_dir_requires_weights_and_tokenizer() {
        let no_weights = write_model_dir(&["config.json", "tokenizer.json"]);
        let err = ModelFiles::local(no_weights.path()).unwrap_err();
        assert!(err.to_string().contains("No weights"));

        let no_tokenizer = write_model_dir(&["config.json", "model.safetensors"]);
        let err = ModelFiles::local(no_tokenizer.path()).unwrap_err();
        assert!(err.to_string().contains("tokenizer"));
    }

    #[test]
    fn test_resolve_prefers_existing_directory() {
        let dir = write_model_dir(&["config.json", "model.safetensors", "tokenizer.json"]);
        let model = ModelId::new(dir.path().to_string_lossy().into_owned());

        let files = resolve(&model, &CandleEngineConfig::default()).unwrap();

        assert_eq!(files.dir(), dir.path());
    }
}
