// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub const DATASET_ID_MAX_LEN: usize = 128;

/// Selection sentinel meaning "every entity of this kind". Never a valid dataset id.
pub const ALL_SENTINEL: &str = "all";

pub fn parse_dataset_id(input: &str) -> Result<DatasetId, ValidationError> {
    DatasetId::parse(input)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("dataset id must not be empty".to_string()));
        }
        if s.eq_ignore_ascii_case(ALL_SENTINEL) {
            return Err(ValidationError(
                "dataset id `all` is reserved and does not name a dataset".to_string(),
            ));
        }
        if s.len() > DATASET_ID_MAX_LEN {
            return Err(ValidationError(format!(
                "dataset id exceeds max length {DATASET_ID_MAX_LEN}"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(ValidationError(
                "dataset id must match [A-Za-z0-9._-]+".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for DatasetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DatasetId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DatasetId> for String {
    fn from(value: DatasetId) -> Self {
        value.0
    }
}
