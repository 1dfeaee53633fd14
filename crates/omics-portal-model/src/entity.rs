// SPDX-License-Identifier: Apache-2.0

use crate::dataset::{DatasetId, ValidationError, ALL_SENTINEL};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const ENTITY_ID_MAX_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Gene,
    Sample,
    CellType,
    Cluster,
    MetaFeature,
    DiffExpComparison,
    SignalBin,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        Self::Gene,
        Self::Sample,
        Self::CellType,
        Self::Cluster,
        Self::MetaFeature,
        Self::DiffExpComparison,
        Self::SignalBin,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gene => "gene",
            Self::Sample => "sample",
            Self::CellType => "cell_type",
            Self::Cluster => "cluster",
            Self::MetaFeature => "meta_feature",
            Self::DiffExpComparison => "diff_exp_comparison",
            Self::SignalBin => "signal_bin",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == input.trim())
            .ok_or_else(|| ValidationError(format!("unknown entity kind `{input}`")))
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one entity inside a dataset: a gene symbol, sample id, cell type name, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if input.is_empty() {
            return Err(ValidationError("entity id must not be empty".to_string()));
        }
        if input.trim() != input {
            return Err(ValidationError(format!(
                "entity id `{input}` must not contain leading/trailing whitespace"
            )));
        }
        if input.len() > ENTITY_ID_MAX_LEN {
            return Err(ValidationError(format!(
                "entity id exceeds max length {ENTITY_ID_MAX_LEN}"
            )));
        }
        if input.chars().any(char::is_control) {
            return Err(ValidationError(
                "entity id must not contain control characters".to_string(),
            ));
        }
        Ok(Self(input.to_string()))
    }

    #[must_use]
    pub fn all() -> Self {
        Self(ALL_SENTINEL.to_string())
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.0 == ALL_SENTINEL
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
pub struct EntityKey {
    pub dataset: DatasetId,
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityKey {
    #[must_use]
    pub fn new(dataset: DatasetId, kind: EntityKind, id: EntityId) -> Self {
        Self { dataset, kind, id }
    }

    pub fn parse(dataset: &DatasetId, kind: EntityKind, id: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(dataset.clone(), kind, EntityId::parse(id)?))
    }

    /// True when the key stands for the dataset-wide aggregate rather than one entity.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.id.is_all()
    }

    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!("{}/{}/{}", self.dataset, self.kind, self.id)
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_string_forms_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()).expect("kind"), kind);
        }
        assert!(EntityKind::parse("transcript").is_err());
    }

    #[test]
    fn entity_id_allows_inner_spaces_but_not_padding() {
        assert!(EntityId::parse("Excitatory neurons").is_ok());
        assert!(EntityId::parse("SNCA-AS1").is_ok());
        assert!(EntityId::parse(" SNCA").is_err());
        assert!(EntityId::parse("").is_err());
        assert!(EntityId::parse("a\tb").is_err());
    }

    #[test]
    fn aggregate_key_is_detected() {
        let ds = DatasetId::parse("pd_visium").expect("dataset");
        let key = EntityKey::new(ds.clone(), EntityKind::Sample, EntityId::all());
        assert!(key.is_aggregate());
        let key = EntityKey::parse(&ds, EntityKind::Sample, "S1").expect("key");
        assert!(!key.is_aggregate());
        assert_eq!(key.canonical_string(), "pd_visium/sample/S1");
    }
}
