use serde::{Deserialize, Serialize};

use crate::constants::Method;

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// JSON-RPC 2.0 request.
///
/// `params` is kept as a `RawValue` so callers can pass any serializable
/// argument list without an intermediate `Value` tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: Method,
    pub params: Box<serde_json::value::RawValue>,
}

impl RpcRequest {
    /// Creates a request with positional parameters.
    pub fn new<T: Serialize>(id: u64, method: Method, params: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(params)?;
        Ok(Self {
            jsonrpc: "2.0".into(),
            id,
            method,
            params: serde_json::value::RawValue::from_string(json)?,
        })
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<serde_json::value::RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Creates a success response.
    pub fn success<T: Serialize>(id: u64, result: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(result)?;
        Ok(Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            result: Some(serde_json::value::RawValue::from_string(json)?),
            error: None,
        })
    }

    /// Creates an error response.
    pub fn failure(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Deserializes the result into the given type.
    ///
    /// A missing or `null` result deserializes as `None`.
    pub fn parse_result<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.result {
            Some(raw) if raw.get() != "null" => Ok(Some(serde_json::from_str(raw.get())?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordRef;

    #[test]
    fn request_serializes_positional_params() {
        let req = RpcRequest::new(7, Method::RelChildren, &("specimen.001", 1)).unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "rel.children");
        assert_eq!(json["params"], serde_json::json!(["specimen.001", 1]));
    }

    #[test]
    fn parse_result_typed() {
        let resp = RpcResponse::success(1, &vec!["grid.001a", "grid.001b"]).unwrap();
        let children: Option<Vec<RecordRef>> = resp.parse_result().unwrap();
        assert_eq!(
            children.unwrap(),
            vec![RecordRef::from("grid.001a"), RecordRef::from("grid.001b")]
        );
    }

    #[test]
    fn parse_result_null_is_none() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        let parsed: Option<String> = resp.parse_result().unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn failure_omits_result() {
        let resp = RpcResponse::failure(9, 404, "no such record");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("result"));
        let parsed: RpcResponse = serde_json::from_str(&json).unwrap();
        let err = parsed.error.unwrap();
        assert_eq!(err.code, 404);
        assert_eq!(err.message, "no such record");
    }
}
