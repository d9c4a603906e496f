//! Proof types for validated content.
//!
//! These types enforce invariants at construction time. Once you hold a
//! value, you know it satisfies all required constraints, so downstream code
//! never re-validates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a single chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Maximum length of a flow title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Chat message content: non-blank after trimming, at most
/// [`MAX_MESSAGE_CHARS`] characters.
///
/// # Serde
///
/// Serializes as a plain JSON string. Deserialization re-validates, so a
/// `MessageContent` read back from storage carries the same guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageContent(String);

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("message content must not be empty")]
    Empty,
    #[error("message content cannot exceed {MAX_MESSAGE_CHARS} characters (got {0})")]
    TooLong(usize),
}

impl MessageContent {
    pub fn new(value: impl Into<String>) -> Result<Self, ContentError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ContentError::Empty);
        }
        let chars = value.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            return Err(ContentError::TooLong(chars));
        }
        Ok(Self(value))
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

impl TryFrom<String> for MessageContent {
    type Error = ContentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for MessageContent {
    type Error = ContentError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageContent> for String {
    fn from(value: MessageContent) -> Self {
        value.0
    }
}

impl std::ops::Deref for MessageContent {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for MessageContent {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Flow title: non-blank after trimming, at most [`MAX_TITLE_CHARS`]
/// characters.
///
/// Candidate flows whose titles fail this proof are skipped at the
/// extraction boundary rather than surfacing as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlowTitle(String);

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("flow title must not be empty")]
    Empty,
    #[error("flow title cannot exceed {MAX_TITLE_CHARS} characters (got {0})")]
    TooLong(usize),
}

impl FlowTitle {
    pub fn new(value: impl Into<String>) -> Result<Self, TitleError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TitleError::Empty);
        }
        let chars = value.chars().count();
        if chars > MAX_TITLE_CHARS {
            return Err(TitleError::TooLong(chars));
        }
        Ok(Self(value))
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

impl TryFrom<String> for FlowTitle {
    type Error = TitleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for FlowTitle {
    type Error = TitleError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FlowTitle> for String {
    fn from(value: FlowTitle) -> Self {
        value.0
    }
}

impl AsRef<str> for FlowTitle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for FlowTitle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
