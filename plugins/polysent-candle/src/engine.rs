//! Candle sequence-classification engine

use crate::config::CandleEngineConfig;
use crate::files::{ModelFiles, WeightsFormat};
use crate::labels::{argmax, ModelKind, ModelMeta};
use crate::megatron::{Config as MegatronBertConfig, MegatronBertModel};
use async_trait::async_trait;
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::distilbert::{Config as DistilBertConfig, DistilBertModel};
use candle_transformers::models::xlm_roberta::{
    Config as XlmRobertaConfig, XLMRobertaForSequenceClassification,
};
use polysent_core::{EngineFailureKind, Error, Result, SentimentResult};
use polysent_router::{run_blocking, Engine};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info};

fn load_err<E: Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::engine_load(format!("{}: {}", context, e))
}

fn invoke_err<E: Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::engine_invocation(format!("{}: {}", context, e))
}

enum Backbone {
    Bert {
        model: BertModel,
        pooler: Option<Linear>,
        classifier: Linear,
    },
    DistilBert {
        model: DistilBertModel,
        pre_classifier: Option<Linear>,
        classifier: Linear,
    },
    XlmRoberta {
        model: XLMRobertaForSequenceClassification,
    },
    MegatronBert {
        model: MegatronBertModel,
        pooler: Option<Linear>,
        classifier: Linear,
    },
}

/// Padded token tensors for one chunk of messages
struct Batch {
    input_ids: Tensor,
    type_ids: Tensor,
    attention_mask: Tensor,
    /// 1 at padded positions, as DistilBERT expects
    padding_mask: Tensor,
}

impl Batch {
    fn encode(tokenizer: &Tokenizer, texts: &[String], device: &Device) -> Result<Self> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = tokenizer
            .encode_batch(inputs, true)
            .map_err(invoke_err("Tokenization failed"))?;

        let rows = encodings.len();
        let cols = encodings.first().map(|e| e.len()).unwrap_or(0);

        let mut ids = Vec::with_capacity(rows * cols);
        let mut type_ids = Vec::with_capacity(rows * cols);
        let mut mask = Vec::with_capacity(rows * cols);
        for encoding in &encodings {
            if encoding.len() != cols {
                return Err(Error::engine_invocation("tokenizer did not pad the batch"));
            }
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }
        let padding: Vec<u8> = mask.iter().map(|&m| u8::from(m == 0)).collect();

        let shape = (rows, cols);
        Ok(Self {
            input_ids: Tensor::from_vec(ids, shape, device).map_err(invoke_err("Failed to create input tensor"))?,
            type_ids: Tensor::from_vec(type_ids, shape, device)
                .map_err(invoke_err("Failed to create token type tensor"))?,
            attention_mask: Tensor::from_vec(mask, shape, device)
                .map_err(invoke_err("Failed to create attention mask"))?,
            padding_mask: Tensor::from_vec(padding, shape, device)
                .map_err(invoke_err("Failed to create padding mask"))?,
        })
    }
}

impl Backbone {
    fn logits(&self, batch: &Batch) -> Result<Tensor> {
        match self {
            Self::Bert {
                model,
                pooler,
                classifier,
            } => {
                let hidden = model
                    .forward(&batch.input_ids, &batch.type_ids, Some(&batch.attention_mask))
                    .map_err(invoke_err("Model forward pass failed"))?;
                pooled_logits(&hidden, pooler.as_ref(), classifier)
            }
            Self::DistilBert {
                model,
                pre_classifier,
                classifier,
            } => {
                let hidden = model
                    .forward(&batch.input_ids, &batch.padding_mask)
                    .map_err(invoke_err("Model forward pass failed"))?;
                let cls = hidden.i((.., 0)).map_err(invoke_err("Failed to get CLS token"))?;
                let pooled = match pre_classifier {
                    Some(pre) => pre
                        .forward(&cls)
                        .and_then(|t| t.relu())
                        .map_err(invoke_err("Pre-classifier failed"))?,
                    None => cls,
                };
                classifier
                    .forward(&pooled)
                    .map_err(invoke_err("Classification head failed"))
            }
            Self::XlmRoberta { model } => model
                .forward(&batch.input_ids, &batch.attention_mask, &batch.type_ids)
                .map_err(invoke_err("Model forward pass failed")),
            Self::MegatronBert {
                model,
                pooler,
                classifier,
            } => {
                let hidden = model
                    .forward(&batch.input_ids, &batch.type_ids, &batch.attention_mask)
                    .map_err(invoke_err("Model forward pass failed"))?;
                pooled_logits(&hidden, pooler.as_ref(), classifier)
            }
        }
    }
}

/// BERT-style head: tanh pooler over the first token, then the classifier
fn pooled_logits(hidden: &Tensor, pooler: Option<&Linear>, classifier: &Linear) -> Result<Tensor> {
    let cls = hidden.i((.., 0)).map_err(invoke_err("Failed to get CLS token"))?;
    let pooled = match pooler {
        Some(pooler) => pooler
            .forward(&cls)
            .and_then(|t| t.tanh())
            .map_err(invoke_err("Pooler failed"))?,
        None => cls,
    };
    classifier
        .forward(&pooled)
        .map_err(invoke_err("Classification head failed"))
}

/// Model state shared with blocking inference tasks
struct Inference {
    tokenizer: Tokenizer,
    backbone: Backbone,
    device: Device,
    labels: Vec<String>,
}

/// A loaded sentiment model.
///
/// Returns the arg-max label from the model's `id2label` with its softmax
/// probability. Labels are passed through unchanged. Forward passes run on
/// the blocking thread pool.
pub struct CandleEngine {
    name: String,
    kind: ModelKind,
    batch_size: usize,
    inference: Arc<Inference>,
}

impl CandleEngine {
    /// Load an engine from resolved model files. Blocking.
    pub fn load(name: &str, files: &ModelFiles, config: &CandleEngineConfig) -> Result<Self> {
        let raw = std::fs::read_to_string(files.config()).map_err(|e| {
            Error::engine_load(format!("Failed to read {}: {}", files.config().display(), e))
        })?;
        let json: Value = serde_json::from_str(&raw).map_err(load_err("Failed to parse config.json"))?;
        let meta = ModelMeta::from_config(&json)?;

        let device = config.open_device()?;
        let tokenizer = load_tokenizer(files.dir(), config.max_length)?;

        let vb = match files.format() {
            // SAFETY: the weights file is not modified while mapped
            WeightsFormat::Safetensors => unsafe {
                VarBuilder::from_mmaped_safetensors(&[files.weights()], DType::F32, &device)
                    .map_err(load_err("Failed to load weights"))?
            },
            WeightsFormat::Pytorch => VarBuilder::from_pth(files.weights(), DType::F32, &device)
                .map_err(load_err("Failed to load weights"))?,
        };

        let backbone = match meta.kind {
            ModelKind::Bert => load_bert(&vb, &raw, &meta)?,
            ModelKind::DistilBert => load_distilbert(&vb, &raw, &meta)?,
            ModelKind::XlmRoberta => load_xlm_roberta(&vb, &raw, &meta)?,
            ModelKind::MegatronBert => load_megatron_bert(&vb, &raw, &meta)?,
        };

        info!(
            model = name,
            kind = meta.kind.as_str(),
            labels = ?meta.labels,
            "Loaded sentiment model"
        );

        Ok(Self {
            name: name.to_string(),
            kind: meta.kind,
            batch_size: config.batch_size.max(1),
            inference: Arc::new(Inference {
                tokenizer,
                backbone,
                device,
                labels: meta.labels,
            }),
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn labels(&self) -> &[String] {
        &self.inference.labels
    }
}

impl Inference {
    fn classify_chunk(&self, texts: &[String]) -> Result<Vec<SentimentResult>> {
        let batch = Batch::encode(&self.tokenizer, texts, &self.device)?;
        let logits = self.backbone.logits(&batch)?;
        let probs: Vec<Vec<f32>> = candle_nn::ops::softmax(&logits, D::Minus1)
            .and_then(|p| p.to_vec2())
            .map_err(invoke_err("Softmax failed"))?;

        probs
            .iter()
            .map(|row| {
                let (index, score) =
                    argmax(row).ok_or_else(|| Error::engine_invocation("model produced no logits"))?;
                let label = self
                    .labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("LABEL_{}", index));
                Ok(SentimentResult::new(label, score))
            })
            .collect()
    }
}

#[async_trait]
impl Engine for CandleEngine {
    async fn classify(&self, texts: &[String]) -> Result<Vec<SentimentResult>> {
        let inference = Arc::clone(&self.inference);
        let name = self.name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        run_blocking(EngineFailureKind::Invocation, move || {
            let mut results = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(batch_size) {
                debug!(model = %name, items = chunk.len(), "Running forward pass");
                results.extend(inference.classify_chunk(chunk)?);
            }
            Ok(results)
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn parse_config<T: DeserializeOwned>(raw: &str, kind: ModelKind) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::engine_load(format!("Failed to parse {} config: {}", kind.as_str(), e)))
}

/// Try each weight prefix in turn, returning the first that loads
fn with_prefixes<'a, T>(
    vb: &VarBuilder<'a>,
    prefixes: &[&'static str],
    what: &str,
    load: impl Fn(VarBuilder<'a>) -> candle_core::Result<T>,
) -> Result<(T, &'static str)> {
    let mut errors = Vec::new();
    for &prefix in prefixes {
        let shown = if prefix.is_empty() { "<root>" } else { prefix };
        let scoped = if prefix.is_empty() { vb.clone() } else { vb.pp(prefix) };
        match load(scoped) {
            Ok(loaded) => {
                debug!(prefix = shown, "Loaded {}", what);
                return Ok((loaded, prefix));
            }
            Err(e) => errors.push(format!("{}: {}", shown, e)),
        }
    }
    Err(Error::engine_load(format!(
        "Failed to load {} with tried prefixes [{}]",
        what,
        errors.join(" | ")
    )))
}

fn classification_head(vb: &VarBuilder<'_>, hidden_size: usize, num_labels: usize) -> Result<Linear> {
    with_prefixes(vb, &["classifier", "score"], "classification head", |vb| {
        candle_nn::linear(hidden_size, num_labels, vb)
    })
    .map(|(head, _)| head)
}

fn scoped<'a>(vb: &VarBuilder<'a>, prefix: &str, name: &str) -> VarBuilder<'a> {
    if prefix.is_empty() {
        vb.pp(name)
    } else {
        vb.pp(prefix).pp(name)
    }
}

fn load_bert(vb: &VarBuilder, raw: &str, meta: &ModelMeta) -> Result<Backbone> {
    let config: BertConfig = parse_config(raw, meta.kind)?;
    let (model, prefix) = with_prefixes(vb, &["bert", ""], "BERT backbone", |vb| BertModel::load(vb, &config))?;
    let pooler = candle_nn::linear(
        meta.hidden_size,
        meta.hidden_size,
        scoped(vb, prefix, "pooler").pp("dense"),
    )
    .ok();
    let classifier = classification_head(vb, meta.hidden_size, meta.num_labels())?;

    Ok(Backbone::Bert {
        model,
        pooler,
        classifier,
    })
}

fn load_distilbert(vb: &VarBuilder, raw: &str, meta: &ModelMeta) -> Result<Backbone> {
    let config: DistilBertConfig = parse_config(raw, meta.kind)?;
    let (model, _) = with_prefixes(vb, &["distilbert", ""], "DistilBERT backbone", |vb| {
        DistilBertModel::load(vb, &config)
    })?;
    let pre_classifier = candle_nn::linear(meta.hidden_size, meta.hidden_size, vb.pp("pre_classifier")).ok();
    let classifier = classification_head(vb, meta.hidden_size, meta.num_labels())?;

    Ok(Backbone::DistilBert {
        model,
        pre_classifier,
        classifier,
    })
}

fn load_megatron_bert(vb: &VarBuilder, raw: &str, meta: &ModelMeta) -> Result<Backbone> {
    let config: MegatronBertConfig = parse_config(raw, meta.kind)?;
    let (model, prefix) = with_prefixes(vb, &["bert", ""], "Megatron-BERT backbone", |vb| {
        MegatronBertModel::load(vb, &config)
    })?;
    let pooler = candle_nn::linear(
        meta.hidden_size,
        meta.hidden_size,
        scoped(vb, prefix, "pooler").pp("dense"),
    )
    .ok();
    let classifier = classification_head(vb, meta.hidden_size, meta.num_labels())?;

    Ok(Backbone::MegatronBert {
        model,
        pooler,
        classifier,
    })
}

fn load_xlm_roberta(vb: &VarBuilder, raw: &str, meta: &ModelMeta) -> Result<Backbone> {
    let config: XlmRobertaConfig = parse_config(raw, meta.kind)?;
    let num_labels = meta.num_labels();
    let (model, _) = with_prefixes(vb, &["", "model"], "XLM-RoBERTa model", |vb| {
        XLMRobertaForSequenceClassification::new(num_labels, &config, vb)
    })?;

    Ok(Backbone::XlmRoberta { model })
}

/// Load `tokenizer.json`, or build a WordPiece tokenizer from `vocab.txt`,
/// then enable truncation and batch padding
pub(crate) fn load_tokenizer(dir: &Path, max_length: usize) -> Result<Tokenizer> {
    let mut tokenizer = read_tokenizer(dir)?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(load_err("Failed to configure truncation"))?;

    let mut padding = match tokenizer.get_padding() {
        Some(padding) => padding.clone(),
        None => {
            let pad_token = ["[PAD]", "<pad>"]
                .into_iter()
                .find(|token| tokenizer.token_to_id(token).is_some())
                .unwrap_or("[PAD]");
            PaddingParams {
                pad_id: tokenizer.token_to_id(pad_token).unwrap_or(0),
                pad_token: pad_token.to_string(),
                ..Default::default()
            }
        }
    };
    padding.strategy = PaddingStrategy::BatchLongest;
    tokenizer.with_padding(Some(padding));

    Ok(tokenizer)
}

fn read_tokenizer(dir: &Path) -> Result<Tokenizer> {
    let tokenizer_json = dir.join("tokenizer.json");
    if tokenizer_json.exists() {
        debug!("Loading tokenizer from tokenizer.json");
        return Tokenizer::from_file(&tokenizer_json).map_err(load_err("Failed to load tokenizer.json"));
    }

    let vocab = dir.join("vocab.txt");
    if vocab.exists() {
        debug!("Building tokenizer from vocab.txt");
        use tokenizers::models::wordpiece::WordPiece;
        use tokenizers::normalizers::BertNormalizer;
        use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
        use tokenizers::processors::bert::BertProcessing;

        let wordpiece = WordPiece::from_file(vocab.to_string_lossy().as_ref())
            .unk_token("[UNK]".to_string())
            .build()
            .map_err(load_err("Failed to build WordPiece model"))?;

        let mut tokenizer = Tokenizer::new(wordpiece);
        let sep = tokenizer.token_to_id("[SEP]").unwrap_or(102);
        let cls = tokenizer.token_to_id("[CLS]").unwrap_or(101);
        tokenizer.with_normalizer(Some(BertNormalizer::default()));
        tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
        tokenizer.with_post_processor(Some(BertProcessing::new(
            ("[SEP]".to_string(), sep),
            ("[CLS]".to_string(), cls),
        )));
        return Ok(tokenizer);
    }

    Err(Error::engine_load(format!(
        "No tokenizer found in {} (tried tokenizer.json, vocab.txt)",
        dir.display()
    )))
}
