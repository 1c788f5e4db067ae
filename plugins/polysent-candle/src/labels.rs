//! Model metadata read from `config.json`

use polysent_core::{Error, Result};
use serde_json::Value;

/// Supported sequence-classification architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Bert,
    DistilBert,
    XlmRoberta,
    MegatronBert,
}

impl ModelKind {
    fn from_model_type(model_type: &str) -> Option<Self> {
        match model_type.to_ascii_lowercase().replace('_', "-").as_str() {
            "bert" => Some(Self::Bert),
            "distilbert" => Some(Self::DistilBert),
            "xlm-roberta" => Some(Self::XlmRoberta),
            "megatron-bert" => Some(Self::MegatronBert),
            _ => None,
        }
    }

    fn from_architecture(architecture: &str) -> Option<Self> {
        if architecture.starts_with("DistilBert") {
            Some(Self::DistilBert)
        } else if architecture.starts_with("MegatronBert") {
            Some(Self::MegatronBert)
        } else if architecture.starts_with("XLMRoberta") {
            Some(Self::XlmRoberta)
        } else if architecture.starts_with("Bert") {
            Some(Self::Bert)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bert => "bert",
            Self::DistilBert => "distilbert",
            Self::XlmRoberta => "xlm-roberta",
            Self::MegatronBert => "megatron-bert",
        }
    }
}

/// Architecture, labels and head size of a classification model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    pub kind: ModelKind,
    pub labels: Vec<String>,
    pub hidden_size: usize,
}

impl ModelMeta {
    /// Parse from the contents of a `config.json`
    pub fn from_config(config: &Value) -> Result<Self> {
        let kind = detect_kind(config)?;
        let labels = labels_from_config(config);
        let hidden_size = config
            .get("hidden_size")
            .or_else(|| config.get("dim"))
            .and_then(Value::as_u64)
            .unwrap_or(768) as usize;

        Ok(Self {
            kind,
            labels,
            hidden_size,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }
}

fn detect_kind(config: &Value) -> Result<ModelKind> {
    let model_type = config.get("model_type").and_then(Value::as_str);
    if let Some(kind) = model_type.and_then(ModelKind::from_model_type) {
        return Ok(kind);
    }

    let from_architectures = config
        .get("architectures")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find_map(ModelKind::from_architecture);

    from_architectures.ok_or_else(|| {
        Error::engine_load(format!(
            "unsupported model_type '{}' (expected bert, distilbert, xlm-roberta or megatron-bert)",
            model_type.unwrap_or("<missing>")
        ))
    })
}

/// Labels ordered by class index.
///
/// Uses `id2label` when present; gaps are filled with `LABEL_{i}`. Without
/// `id2label`, a two-class model is assumed to be negative/positive.
pub fn labels_from_config(config: &Value) -> Vec<String> {
    let declared = config
        .get("num_labels")
        .or_else(|| config.get("_num_labels"))
        .and_then(Value::as_u64)
        .map(|n| n as usize);

    let mut indexed: Vec<(usize, String)> = config
        .get("id2label")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(id, label)| Some((id.parse().ok()?, label.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();

    if indexed.is_empty() {
        return match declared.unwrap_or(2) {
            2 => vec!["negative".to_string(), "positive".to_string()],
            n => (0..n).map(|i| format!("LABEL_{}", i)).collect(),
        };
    }

    indexed.sort_by_key(|(id, _)| *id);
    let count = indexed
        .last()
        .map(|(id, _)| id + 1)
        .unwrap_or(0)
        .max(declared.unwrap_or(0));

    let mut labels: Vec<String> = (0..count).map(|i| format!("LABEL_{}", i)).collect();
    for (id, label) in indexed {
        labels[id] = label;
    }
    labels
}

/// Index and value of the largest probability
pub fn argmax(probs: &[f32]) -> Option<(usize, f32)> {
    probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}
