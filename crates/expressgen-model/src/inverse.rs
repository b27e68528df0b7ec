//! Inverse index: target entity → reciprocal attributes held against it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::Name;

/// `owning_entity.owning_attribute` is the reverse view of
/// `target_entity.target_attribute`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InverseLink {
    pub owning_entity: Name,
    pub owning_attribute: Name,
    pub target_entity: Name,
    pub target_attribute: Name,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InverseIndex {
    by_target: BTreeMap<Name, Vec<InverseLink>>,
}

impl InverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, link: InverseLink) {
        self.by_target
            .entry(link.target_entity.clone())
            .or_default()
            .push(link);
    }

    /// Links whose target is exactly `entity`, in declaration order.
    pub fn links_to(&self, entity: &str) -> &[InverseLink] {
        self.by_target.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.by_target.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InverseLink> {
        self.by_target.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_target.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}
