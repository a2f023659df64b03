use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A stage result, either as the record itself or wrapped in a response
/// envelope whose `body` holds the record serialized as JSON.
///
/// Stage inputs accept both shapes and call [`Payload::normalize`] once,
/// before any stage logic runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload<T> {
    Wrapped(Envelope),
    Raw(T),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub body: String,
}

impl<T> Payload<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn wrap(status_code: u16, record: &T) -> Result<Self> {
        Ok(Self::Wrapped(Envelope {
            status_code: Some(status_code),
            body: serde_json::to_string_pretty(record)?,
        }))
    }

    pub fn normalize(self) -> Result<T> {
        match self {
            Self::Raw(record) => Ok(record),
            Self::Wrapped(envelope) => Ok(serde_json::from_str(&envelope.body)?),
        }
    }
}

impl<T> From<T> for Payload<T> {
    fn from(record: T) -> Self {
        Self::Raw(record)
    }
}

/// Outcome of one stage: its record, or the message of the failure that
/// stopped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageOutcome<T> {
    Failed { error: String },
    Completed(T),
}

impl<T> StageOutcome<T> {
    pub fn failed(error: impl ToString) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(record) => Some(record),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            Self::Completed(_) => None,
        }
    }
}

impl<T, E: std::fmt::Display> From<std::result::Result<T, E>> for StageOutcome<T> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(record) => Self::Completed(record),
            Err(e) => Self::failed(e),
        }
    }
}
