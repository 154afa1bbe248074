//! Job identity.

use std::fmt;

use serde::Serialize;

use super::JobError;

const ID_LEN: usize = 40;

/// A 40 hex digit job identifier, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Validates a user supplied identifier.
    pub fn parse(value: &str) -> Result<Self, JobError> {
        if value.len() != ID_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(JobError::InvalidJobId(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Generates a random identifier.
    pub fn generate() -> Self {
        let bytes: [u8; ID_LEN / 2] = rand::random();
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Uses `value` if given, otherwise generates a fresh identifier.
    pub fn parse_or_generate(value: Option<&str>) -> Result<Self, JobError> {
        match value {
            Some(v) => Self::parse(v),
            None => Ok(Self::generate()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven digits, used in directory names.
    pub fn short(&self) -> &str {
        &self.0[..7]
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
