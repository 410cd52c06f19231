// CommandRequest: the wire record carried in a queue message body.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A request to run a named command with positional parameters.
///
/// Encoded as JSON: `{"name": "echo", "params": ["hello"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Why a message body could not be turned into a [`CommandRequest`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed command request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("command request has an empty name")]
    MissingName,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Serialize for enqueuing.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a message body. Anything that is not a request with a non-empty
    /// name is rejected; there is no zero-valued fallback.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let request: CommandRequest = serde_json::from_slice(body)?;
        if request.name.trim().is_empty() {
            return Err(DecodeError::MissingName);
        }
        Ok(request)
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}
