//! Megatron-BERT encoder
//!
//! Weights follow the BERT layout, but every layer normalizes its input
//! before attention and before the feed-forward block, and the encoder ends
//! with a final norm. Embeddings are summed without a layer norm.

use candle_core::{DType, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, linear, Embedding, LayerNorm, Linear, Module, VarBuilder};
use candle_transformers::models::bert::HiddenAct;
use serde::Deserialize;

/// Fields of a Megatron-BERT `config.json` used by the encoder
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: HiddenAct,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_hidden_act() -> HiddenAct {
    HiddenAct::Gelu
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn activate(act: HiddenAct, xs: &Tensor) -> Result<Tensor> {
    match act {
        HiddenAct::Gelu => xs.gelu_erf(),
        HiddenAct::GeluApproximate => xs.gelu(),
        HiddenAct::Relu => xs.relu(),
    }
}

struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        Ok(Self {
            word: embedding(config.vocab_size, config.hidden_size, vb.pp("word_embeddings"))?,
            position: embedding(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type: embedding(config.type_vocab_size, config.hidden_size, vb.pp("token_type_embeddings"))?,
        })
    }

    fn forward(&self, input_ids: &Tensor, type_ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let xs = (self.word.forward(input_ids)? + self.token_type.forward(type_ids)?)?;
        xs.broadcast_add(&self.position.forward(&positions)?)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    heads: usize,
    head_size: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            query: linear(hidden, hidden, vb.pp("query"))?,
            key: linear(hidden, hidden, vb.pp("key"))?,
            value: linear(hidden, hidden, vb.pp("value"))?,
            heads: config.num_attention_heads,
            head_size: hidden / config.num_attention_heads,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        xs.reshape((batch, seq_len, self.heads, self.head_size))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let query = self.split_heads(&self.query.forward(xs)?)?;
        let key = self.split_heads(&self.key.forward(xs)?)?;
        let value = self.split_heads(&self.value.forward(xs)?)?;

        let scores = (query.matmul(&key.t()?)? / (self.head_size as f64).sqrt())?;
        let probs = candle_nn::ops::softmax(&scores.broadcast_add(mask)?, D::Minus1)?;
        probs
            .matmul(&value)?
            .transpose(1, 2)?
            .contiguous()?
            .flatten_from(D::Minus2)
    }
}

struct Layer {
    attention_norm: LayerNorm,
    attention: SelfAttention,
    attention_out: Linear,
    ffn_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    act: HiddenAct,
}

impl Layer {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let hidden = config.hidden_size;
        let attention = vb.pp("attention");
        Ok(Self {
            attention_norm: layer_norm(hidden, config.layer_norm_eps, attention.pp("ln"))?,
            attention: SelfAttention::load(attention.pp("self"), config)?,
            attention_out: linear(hidden, hidden, attention.pp("output").pp("dense"))?,
            ffn_norm: layer_norm(hidden, config.layer_norm_eps, vb.pp("ln"))?,
            intermediate: linear(hidden, config.intermediate_size, vb.pp("intermediate").pp("dense"))?,
            output: linear(config.intermediate_size, hidden, vb.pp("output").pp("dense"))?,
            act: config.hidden_act,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let attended = self.attention.forward(&self.attention_norm.forward(xs)?, mask)?;
        let xs = (xs + self.attention_out.forward(&attended)?)?;

        let hidden = activate(self.act, &self.intermediate.forward(&self.ffn_norm.forward(&xs)?)?)?;
        xs + self.output.forward(&hidden)?
    }
}

/// Megatron-BERT encoder returning the final hidden states
pub struct MegatronBertModel {
    embeddings: Embeddings,
    layers: Vec<Layer>,
    final_norm: LayerNorm,
}

impl MegatronBertModel {
    /// Load from a builder scoped to the model root (usually `bert`)
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let embeddings = Embeddings::load(vb.pp("embeddings"), config)?;
        let encoder = vb.pp("encoder");
        let layers = (0..config.num_hidden_layers)
            .map(|index| Layer::load(encoder.pp(format!("layer.{index}")), config))
            .collect::<Result<Vec<_>>>()?;
        let final_norm = layer_norm(config.hidden_size, config.layer_norm_eps, encoder.pp("ln"))?;

        Ok(Self {
            embeddings,
            layers,
            final_norm,
        })
    }

    /// Hidden states of shape `(batch, seq_len, hidden_size)`.
    ///
    /// `attention_mask` is 1 for real tokens and 0 for padding.
    pub fn forward(&self, input_ids: &Tensor, type_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let mask = extended_mask(attention_mask)?;
        let mut xs = self.embeddings.forward(input_ids, type_ids)?;
        for layer in &self.layers {
            xs = layer.forward(&xs, &mask)?;
        }
        self.final_norm.forward(&xs)
    }
}

/// Additive mask broadcastable over heads: 0 for tokens, a large negative for padding
fn extended_mask(attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.unsqueeze(1)?.unsqueeze(1)?.to_dtype(DType::F32)?;
    (mask.ones_like()? - &mask)?.affine(f32::MIN as f64, 0.0)
}
