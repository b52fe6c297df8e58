use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into the configured, ordered list of division names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DivisionId(pub usize);

impl DivisionId {
    pub fn index(&self) -> usize {
        self.0
    }

    pub(crate) fn to_db(self) -> i64 {
        self.0 as i64
    }

    pub(crate) fn from_db(value: i64) -> Self {
        DivisionId(value.max(0) as usize)
    }
}

impl fmt::Display for DivisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The ordered set of division names the venue is split into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divisions {
    names: Vec<String>,
}

impl Divisions {
    pub fn new(names: Vec<String>) -> AppResult<Self> {
        if names.is_empty() {
            return Err(AppError::Config("at least one division is required".into()));
        }
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(AppError::Config("division names must not be empty".into()));
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, id: DivisionId) -> Option<&str> {
        self.names.get(id.0).map(String::as_str)
    }

    /// Resolve an index, failing with a validation error when out of range.
    pub fn resolve(&self, index: usize) -> AppResult<DivisionId> {
        if index < self.names.len() {
            Ok(DivisionId(index))
        } else {
            Err(AppError::Validation(format!(
                "division {} does not exist ({} configured)",
                index,
                self.names.len()
            )))
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = DivisionId> + '_ {
        (0..self.names.len()).map(DivisionId)
    }
}
