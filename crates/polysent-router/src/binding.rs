//! Language-to-model binding
//!
//! A [`ModelBinding`] is always built fresh by merging overrides over a base
//! table. Merging is pure: the base is never modified.

use polysent_core::{LanguageTag, ModelId};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Caller-supplied model overrides keyed by language
pub type ModelOverrides = HashMap<LanguageTag, ModelId>;

/// Multilingual model shared by most default languages
pub const MULTILINGUAL_MODEL: &str = "lxyuan/distilbert-base-multilingual-cased-sentiments-student";

/// Swedish sentiment model
pub const SWEDISH_MODEL: &str = "KBLab/robust-swedish-sentiment-multiclass";

/// Finnish sentiment model
pub const FINNISH_MODEL: &str = "fergusq/finbert-finnsentiment";

/// Language whose model is kept warm by default
pub const DEFAULT_WARM_LANGUAGE: LanguageTag = LanguageTag::Finnish;

/// Built-in language-to-model table
pub const DEFAULT_MODELS: &[(LanguageTag, &str)] = &[
    (LanguageTag::English, MULTILINGUAL_MODEL),
    (LanguageTag::Japanese, MULTILINGUAL_MODEL),
    (LanguageTag::Arabic, MULTILINGUAL_MODEL),
    (LanguageTag::German, MULTILINGUAL_MODEL),
    (LanguageTag::Spanish, MULTILINGUAL_MODEL),
    (LanguageTag::French, MULTILINGUAL_MODEL),
    (LanguageTag::Chinese, MULTILINGUAL_MODEL),
    (LanguageTag::Indonesian, MULTILINGUAL_MODEL),
    (LanguageTag::Hindi, MULTILINGUAL_MODEL),
    (LanguageTag::Italian, MULTILINGUAL_MODEL),
    (LanguageTag::Malay, MULTILINGUAL_MODEL),
    (LanguageTag::Portuguese, MULTILINGUAL_MODEL),
    (LanguageTag::Swedish, SWEDISH_MODEL),
    (LanguageTag::Finnish, FINNISH_MODEL),
];

/// Mapping from language to the model that classifies it.
///
/// `Unknown` is never bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ModelBinding {
    models: BTreeMap<LanguageTag, ModelId>,
}

impl ModelBinding {
    /// Create an empty binding
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in default binding
    pub fn defaults() -> Self {
        DEFAULT_MODELS
            .iter()
            .map(|(tag, model)| (*tag, ModelId::from(*model)))
            .collect()
    }

    /// Model bound to a language
    pub fn get(&self, tag: LanguageTag) -> Option<&ModelId> {
        self.models.get(&tag)
    }

    /// Whether a language has a model
    pub fn contains(&self, tag: LanguageTag) -> bool {
        self.models.contains_key(&tag)
    }

    /// Bind a language to a model, replacing any existing binding
    pub fn with_override(mut self, tag: LanguageTag, model: impl Into<ModelId>) -> Self {
        self.insert(tag, model.into());
        self
    }

    /// Remove the binding for a language, making it unclassifiable
    pub fn without(mut self, tag: LanguageTag) -> Self {
        self.models.remove(&tag);
        self
    }

    /// Number of bound languages
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no language is bound
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Bound languages in a stable order
    pub fn languages(&self) -> impl Iterator<Item = LanguageTag> + '_ {
        self.models.keys().copied()
    }

    /// Iterate over (language, model) pairs in a stable order
    pub fn iter(&self) -> impl Iterator<Item = (LanguageTag, &ModelId)> {
        self.models.iter().map(|(tag, model)| (*tag, model))
    }

    /// Distinct model identifiers, sorted
    pub fn models(&self) -> Vec<ModelId> {
        self.models
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Return a new binding with `overrides` applied over this one
    pub fn merge(&self, overrides: &ModelOverrides) -> Self {
        merge(self, overrides)
    }

    fn insert(&mut self, tag: LanguageTag, model: ModelId) {
        if tag.is_unknown() {
            warn!(model = %model, "Ignoring model binding for the unknown language");
            return;
        }
        self.models.insert(tag, model);
    }
}

impl FromIterator<(LanguageTag, ModelId)> for ModelBinding {
    fn from_iter<I: IntoIterator<Item = (LanguageTag, ModelId)>>(iter: I) -> Self {
        let mut binding = Self::new();
        for (tag, model) in iter {
            binding.insert(tag, model);
        }
        binding
    }
}

impl From<ModelOverrides> for ModelBinding {
    fn from(models: ModelOverrides) -> Self {
        models.into_iter().collect()
    }
}

impl<'de> Deserialize<'de> for ModelBinding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ModelOverrides::deserialize(deserializer).map(Self::from)
    }
}

/// Merge `overrides` over `base` into a new binding.
///
/// Override entries replace base entries for the same language; all other
/// base entries are kept.
pub fn merge(base: &ModelBinding, overrides: &ModelOverrides) -> ModelBinding {
    let mut merged = base.clone();
    for (tag, model) in overrides {
        merged.insert(*tag, model.clone());
    }
    merged
}

/// Build the effective binding from the defaults and optional overrides
pub fn bind(overrides: Option<&ModelOverrides>) -> ModelBinding {
    let defaults = ModelBinding::defaults();
    match overrides {
        Some(overrides) => merge(&defaults, overrides),
        None => defaults,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_table() {
        let defaults = ModelBinding::defaults();

        assert_eq!(defaults.len(), 14);
        assert_eq!(defaults.get(LanguageTag::Finnish).unwrap().as_str(), FINNISH_MODEL);
        assert_eq!(defaults.get(LanguageTag::Swedish).unwrap().as_str(), SWEDISH_MODEL);
        assert_eq!(defaults.get(LanguageTag::English).unwrap().as_str(), MULTILINGUAL_MODEL);
        assert!(defaults.get(LanguageTag::Unknown).is_none());
        assert!(defaults.get(LanguageTag::Russian).is_none());
        assert_eq!(defaults.models().len(), 3);
    }

    #[test]
    fn test_bind_empty_overrides_equals_defaults() {
        let overrides = ModelOverrides::new();

        assert_eq!(bind(Some(&overrides)), ModelBinding::defaults());
        assert_eq!(bind(None), ModelBinding::defaults());
    }

    #[test]
    fn test_bind_override_changes_only_its_key() {
        let overrides = ModelOverrides::from([(LanguageTag::Swedish, ModelId::new("m"))]);
        let merged = bind(Some(&overrides));
        let defaults = ModelBinding::defaults();

        assert_eq!(merged.get(LanguageTag::Swedish).unwrap().as_str(), "m");
        for (tag, model) in defaults.iter() {
            if tag != LanguageTag::Swedish {
                assert_eq!(merged.get(tag), Some(model));
            }
        }
        assert_eq!(merged.len(), defaults.len());
    }

    #[test]
    fn test_override_adds_new_language() {
        let overrides = ModelOverrides::from([(LanguageTag::Russian, ModelId::new("ru-model"))]);
        let merged = bind(Some(&overrides));

        assert_eq!(merged.len(), 15);
        assert_eq!(merged.get(LanguageTag::Russian).unwrap().as_str(), "ru-model");
    }

    #[test]
    fn test_merge_does_not_mutate_base() {
        let base = ModelBinding::defaults();
        let overrides = ModelOverrides::from([(LanguageTag::English, ModelId::new("en"))]);

        let merged = base.merge(&overrides);

        assert_eq!(base, ModelBinding::defaults());
        assert_ne!(merged, base);
    }

    #[test]
    fn test_unknown_is_never_bound() {
        let binding = ModelBinding::new().with_override(LanguageTag::Unknown, "catch-all");
        assert!(binding.is_empty());

        let overrides = ModelOverrides::from([(LanguageTag::Unknown, ModelId::new("catch-all"))]);
        assert_eq!(bind(Some(&overrides)), ModelBinding::defaults());
    }

    #[test]
    fn test_without_removes_binding() {
        let binding = ModelBinding::defaults().without(LanguageTag::Finnish);
        assert!(!binding.contains(LanguageTag::Finnish));
        assert_eq!(binding.len(), 13);
    }
}
