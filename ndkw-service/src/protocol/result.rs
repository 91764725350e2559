use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of outcomes reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultCode {
    Success,
    InvalidEndpoint,
    InvalidInputStructure,
    NotFound,
    InvalidState,
    Timeout,
    NoResponse,
    NotConnected,
    Disconnected,
}

/// JSON body of every response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFrame {
    pub code: ResultCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Raw bytes following this frame, for content results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

impl ResultFrame {
    pub fn success() -> Self {
        Self {
            code: ResultCode::Success,
            error_message: None,
            data: None,
            content_length: None,
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::success()
        }
    }

    pub fn content(length: u64) -> Self {
        Self {
            content_length: Some(length),
            ..Self::success()
        }
    }

    pub fn failure(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            error_message: Some(message.into()),
            data: None,
            content_length: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }

    /// Deserialize `data`. A missing value is read as JSON `null`.
    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_are_camel_case() {
        assert_eq!(serde_json::to_value(ResultCode::InvalidInputStructure).unwrap(), json!("invalidInputStructure"));
        assert_eq!(serde_json::to_value(ResultCode::NotFound).unwrap(), json!("notFound"));
    }

    #[test]
    fn empty_success_has_only_code() {
        assert_eq!(serde_json::to_value(ResultFrame::success()).unwrap(), json!({"code": "success"}));
    }

    #[test]
    fn failure_and_content_shapes() {
        let failure = ResultFrame::failure(ResultCode::InvalidState, "no recording is in progress");
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"code": "invalidState", "errorMessage": "no recording is in progress"})
        );

        let content = ResultFrame::content(162);
        assert_eq!(serde_json::to_value(&content).unwrap(), json!({"code": "success", "contentLength": 162}));
    }

    #[test]
    fn data_decodes() {
        let frame: ResultFrame = serde_json::from_str(r#"{"code":"success","data":[1,2,3]}"#).unwrap();
        assert_eq!(frame.data_as::<Vec<u8>>().unwrap(), vec![1, 2, 3]);
        assert_eq!(ResultFrame::success().data_as::<Option<u8>>().unwrap(), None);
    }
}
