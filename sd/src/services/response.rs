//! The `{ success, data?, error? }` envelope every remote service answers with

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

pub type ServiceResult = Result<Value, FetchError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// A message string or an object carrying `message`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ServiceResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(Value::String(message.into())),
        }
    }

    /// Human-readable error, if the service sent one
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(message) => Some(message.clone()),
            Value::Object(fields) => match fields.get("message") {
                Some(Value::String(message)) => Some(message.clone()),
                _ => Some(Value::Object(fields.clone()).to_string()),
            },
            other => Some(other.to_string()),
        }
    }

    /// `success: false` is an ordinary failure outcome, never retried here
    pub fn into_result(self) -> ServiceResult {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            let message = self.error_message().unwrap_or_else(|| "unknown error".to_string());
            Err(FetchError::Service(message))
        }
    }
}
