use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIN_CODE_LEN: usize = 4;
pub const MAX_CODE_LEN: usize = 12;

/// Short human-readable room address, as typed by players when they gather
/// in a session. Case-insensitive on input, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(value: &str) -> Result<Self, CodeError> {
        let value = value.trim();
        if value.len() < MIN_CODE_LEN || value.len() > MAX_CODE_LEN {
            return Err(CodeError::BadLength { found: value.len() });
        }
        for (index, ch) in value.chars().enumerate() {
            if !ch.is_ascii_alphanumeric() {
                return Err(CodeError::InvalidCharacter { ch, index });
            }
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RoomCode {
    type Err = CodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("room code must be 4-12 characters, got {found}")]
    BadLength { found: usize },
    #[error("invalid character '{ch}' in room code at position {index}")]
    InvalidCharacter { ch: char, index: usize },
}
