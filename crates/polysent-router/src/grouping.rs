//! Partitioning messages into per-model work groups

use crate::binding::ModelBinding;
use polysent_core::{LanguageTag, ModelId};
use std::collections::HashMap;
use tracing::debug;

/// A message together with its original position in the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Zero-based position in the input sequence
    pub index: usize,

    /// Message text
    pub text: String,
}

/// Messages destined for one engine invocation, in ascending index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkGroup {
    model: ModelId,
    items: Vec<WorkItem>,
}

impl WorkGroup {
    fn new(model: ModelId) -> Self {
        Self {
            model,
            items: Vec::new(),
        }
    }

    /// Model that classifies this group
    pub fn model(&self) -> &ModelId {
        &self.model
    }

    /// Items in ascending index order
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    /// Number of messages in the group
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Original positions of the group's messages
    pub fn indices(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.index).collect()
    }

    /// Message texts, in group order
    pub fn texts(&self) -> Vec<String> {
        self.items.iter().map(|item| item.text.clone()).collect()
    }
}

/// Result of partitioning a batch by model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    /// Non-empty groups, in first-seen order of their model
    pub groups: Vec<WorkGroup>,

    /// Positions of messages with no bound model, ascending
    pub unclassifiable: Vec<usize>,
}

impl Grouping {
    /// Number of positions covered by groups and the unclassifiable list
    pub fn total(&self) -> usize {
        self.groups.iter().map(WorkGroup::len).sum::<usize>() + self.unclassifiable.len()
    }

    /// Group for a model, if any message was routed to it
    pub fn group_for(&self, model: &ModelId) -> Option<&WorkGroup> {
        self.groups.iter().find(|group| group.model() == model)
    }

    /// Distinct models that will be invoked
    pub fn models(&self) -> Vec<&ModelId> {
        self.groups.iter().map(WorkGroup::model).collect()
    }
}

/// Partition (message, language) pairs by the model bound to each language.
///
/// Scanning in input order and appending keeps every group in ascending index
/// order. Messages whose language has no binding, including `Unknown`, are
/// recorded as unclassifiable.
pub fn group(pairs: &[(String, LanguageTag)], binding: &ModelBinding) -> Grouping {
    let mut grouping = Grouping::default();
    let mut slots: HashMap<&ModelId, usize> = HashMap::new();

    for (index, (text, tag)) in pairs.iter().enumerate() {
        let Some(model) = binding.get(*tag) else {
            grouping.unclassifiable.push(index);
            continue;
        };

        let slot = *slots.entry(model).or_insert_with(|| {
            grouping.groups.push(WorkGroup::new(model.clone()));
            grouping.groups.len() - 1
        });

        grouping.groups[slot].items.push(WorkItem {
            index,
            text: text.clone(),
        });
    }

    debug!(
        messages = pairs.len(),
        groups = grouping.groups.len(),
        unclassifiable = grouping.unclassifiable.len(),
        "Grouped messages by model"
    );

    grouping
}
