//! Candle sentiment engines for polysent
//!
//! Provides [`HfEngineFactory`], an [`EngineFactory`](polysent_router::EngineFactory)
//! that loads BERT, DistilBERT, XLM-RoBERTa and Megatron-BERT
//! sequence-classification models from the Hugging Face hub or a local
//! directory and runs them with candle. Weights are read from
//! `model.safetensors`, or `pytorch_model.bin` when a repository has no
//! safetensors file.
//!
//! These architectures cover the router's default models: the multilingual
//! DistilBERT student, the Finnish FinBERT model (BERT) and the Swedish KBLab
//! model (Megatron-BERT). Other architectures fail with a load error naming
//! their `model_type`.
//!
//! ```no_run
//! use polysent_candle::HfEngineFactory;
//! use polysent_router::BatchSentimentRouter;
//! use std::sync::Arc;
//!
//! # async fn run() -> polysent_core::Result<()> {
//! let router = BatchSentimentRouter::builder()
//!     .engine_factory(Arc::new(HfEngineFactory::new()))
//!     .build()?;
//! router.warm_up().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod factory;
pub mod files;
pub mod labels;
pub mod megatron;

pub use config::CandleEngineConfig;
pub use engine::CandleEngine;
pub use factory::HfEngineFactory;
pub use files::{ModelFiles, WeightsFormat};
pub use labels::{ModelKind, ModelMeta};
