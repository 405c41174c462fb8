//! Result envelopes used by the hub pushes and the REST endpoints.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::PayloadError;

/// Outcome of a backend operation once its response shape has been normalised.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResult<T> {
    /// Normalised payload.
    Success(T),
    /// Rejected by the backend.
    Failure {
        /// Reason reported by the backend.
        message: String,
    },
}

impl<T> ApiResult<T> {
    /// True for [`ApiResult::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, ApiResult::Success(_))
    }

    /// Transform the success value, keeping failures as they are.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResult<U> {
        match self {
            ApiResult::Success(value) => ApiResult::Success(f(value)),
            ApiResult::Failure { message } => ApiResult::Failure { message },
        }
    }

    /// Convert into a plain `Result`, turning failures into [`PayloadError::Rejected`].
    pub fn into_result(self) -> Result<T, PayloadError> {
        match self {
            ApiResult::Success(value) => Ok(value),
            ApiResult::Failure { message } => Err(PayloadError::Rejected(message)),
        }
    }
}

/// `{ isSuccess, data, message }` wrapper carried by hub results.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// `isSuccess` flag, or `true` when the payload had none.
    pub is_success: bool,
    /// Payload with the wrapper stripped.
    pub data: Option<Value>,
    /// Failure reason or informational message.
    pub message: Option<String>,
}

const SUCCESS_KEYS: [&str; 3] = ["isSuccess", "IsSuccess", "success"];
const DATA_KEYS: [&str; 4] = ["data", "Data", "value", "result"];
const MESSAGE_KEYS: [&str; 6] = [
    "errorMessage",
    "message",
    "error",
    "errors",
    "Message",
    "Error",
];

impl Envelope {
    /// Parse an envelope, returning `None` when the value carries no success flag.
    pub fn detect(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let is_success = lookup(object, &SUCCESS_KEYS)?.as_bool()?;
        let data = lookup(object, &DATA_KEYS)
            .filter(|data| !data.is_null())
            .cloned();
        let message = lookup(object, &MESSAGE_KEYS).and_then(message_text);
        Some(Self {
            is_success,
            data,
            message,
        })
    }

    /// Parse an envelope that must be present.
    pub fn require(value: &Value) -> Result<Self, PayloadError> {
        Self::detect(value).ok_or(PayloadError::MissingField("isSuccess"))
    }

    /// Success carries the data (possibly none); failure carries a message.
    pub fn into_api_result(self) -> ApiResult<Option<Value>> {
        if self.is_success {
            ApiResult::Success(self.data)
        } else {
            ApiResult::Failure {
                message: self
                    .message
                    .unwrap_or_else(|| "operation failed".to_string()),
            }
        }
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(message_text).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

/// Normalise the list shapes the backend uses into one result.
///
/// Recognised: a bare array, `{ "items": [...] }`, `{ "$values": [...] }`,
/// `{ "data": <any of these> }`, and the `isSuccess` envelope around any of
/// them. A failed envelope becomes [`ApiResult::Failure`].
pub fn normalize_list<T: DeserializeOwned>(value: Value) -> Result<ApiResult<Vec<T>>, PayloadError> {
    if let Some(envelope) = Envelope::detect(&value) {
        return match envelope.into_api_result() {
            ApiResult::Success(Some(data)) => normalize_list(data),
            ApiResult::Success(None) => Ok(ApiResult::Success(Vec::new())),
            ApiResult::Failure { message } => Ok(ApiResult::Failure { message }),
        };
    }

    let items = extract_items(value)?;
    let parsed = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()?;
    Ok(ApiResult::Success(parsed))
}

fn extract_items(value: Value) -> Result<Vec<Value>, PayloadError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        Value::Object(mut object) => {
            for key in ["items", "$values", "data", "Data", "value"] {
                if let Some(inner) = object.remove(key) {
                    return extract_items(inner);
                }
            }
            Err(PayloadError::Invalid(
                "object does not contain a list of items".to_string(),
            ))
        }
        other => Err(PayloadError::Invalid(format!(
            "expected a list, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Course {
        code: String,
    }

    fn codes(result: ApiResult<Vec<Course>>) -> Vec<String> {
        match result {
            ApiResult::Success(items) => items.into_iter().map(|course| course.code).collect(),
            ApiResult::Failure { message } => panic!("unexpected failure: {message}"),
        }
    }

    #[test]
    fn list_shapes_normalise_to_the_same_items() -> Result<(), PayloadError> {
        let shapes = [
            json!([{ "code": "CS101" }, { "code": "MA201" }]),
            json!({ "items": [{ "code": "CS101" }, { "code": "MA201" }] }),
            json!({ "$values": [{ "code": "CS101" }, { "code": "MA201" }] }),
            json!({ "data": { "items": [{ "code": "CS101" }, { "code": "MA201" }] } }),
            json!({ "isSuccess": true, "data": [{ "code": "CS101" }, { "code": "MA201" }] }),
        ];
        for shape in shapes {
            assert_eq!(codes(normalize_list(shape)?), vec!["CS101", "MA201"]);
        }
        Ok(())
    }

    #[test]
    fn failed_envelope_becomes_failure() -> Result<(), PayloadError> {
        let result: ApiResult<Vec<Course>> =
            normalize_list(json!({ "isSuccess": false, "errors": ["Level not found", "Retry"] }))?;
        assert_eq!(
            result,
            ApiResult::Failure {
                message: "Level not found; Retry".to_string()
            }
        );

        let result: ApiResult<Vec<Course>> = normalize_list(json!({ "isSuccess": false }))?;
        assert_eq!(
            result,
            ApiResult::Failure {
                message: "operation failed".to_string()
            }
        );

        let result: ApiResult<Vec<Course>> =
            normalize_list(json!({ "isSuccess": false, "errorMessage": "Level not found" }))?;
        assert_eq!(
            result,
            ApiResult::Failure {
                message: "Level not found".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn scalar_is_not_a_list() {
        let result: Result<ApiResult<Vec<Course>>, _> = normalize_list(json!(42));
        assert!(result.is_err());
    }

    #[test]
    fn envelope_detection_requires_flag() {
        assert!(Envelope::detect(&json!({ "data": [] })).is_none());
        let envelope = Envelope::detect(&json!({ "IsSuccess": true, "Data": { "level": 1 } }))
            .expect("envelope");
        assert!(envelope.is_success);
        assert_eq!(envelope.data, Some(json!({ "level": 1 })));
    }
}
