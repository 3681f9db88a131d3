//! JSON-RPC 2.0 message model
//!
//! Request, response and notification records, the fixed error code space,
//! and validating (de)serialization. Validation happens when a message is
//! built or serialized, so a malformed message never reaches the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON-RPC 2.0 version identifier
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Error codes
// ============================================================================

/// The fixed error code space carried in error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Reserved implementation-defined range -32099..=-32000
    ServerError(i32),
    UnknownError,
    Timeout,
    RequestCancelled,
}

impl ErrorCode {
    pub const SERVER_ERROR_START: i32 = -32099;
    pub const SERVER_ERROR_END: i32 = -32000;

    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError(code) => code,
            ErrorCode::UnknownError => -32001,
            ErrorCode::Timeout => -32002,
            ErrorCode::RequestCancelled => -32800,
        }
    }

    /// Map a wire code back onto the code space; codes outside it are `None`
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            -32001 => Some(ErrorCode::UnknownError),
            -32002 => Some(ErrorCode::Timeout),
            -32800 => Some(ErrorCode::RequestCancelled),
            c if Self::is_server_error(c) => Some(ErrorCode::ServerError(c)),
            _ => None,
        }
    }

    pub fn is_server_error(code: i32) -> bool {
        (Self::SERVER_ERROR_START..=Self::SERVER_ERROR_END).contains(&code)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Protocol and transport level failures
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("JSON-RPC parse error: {0}")]
    Parse(String),

    #[error("JSON-RPC invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON-RPC method not found: {0}")]
    MethodNotFound(String),

    #[error("JSON-RPC invalid params: {0}")]
    InvalidParams(String),

    #[error("JSON-RPC internal error: {0}")]
    Internal(String),

    /// Error response received from the peer
    #[error("JSON-RPC error ({code}): {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Request timeout")]
    Timeout,

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl RpcError {
    /// Code used when this error is reported in an error response
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Parse(_) => ErrorCode::ParseError.code(),
            RpcError::InvalidRequest(_) => ErrorCode::InvalidRequest.code(),
            RpcError::MethodNotFound(_) => ErrorCode::MethodNotFound.code(),
            RpcError::InvalidParams(_) => ErrorCode::InvalidParams.code(),
            RpcError::Internal(_) => ErrorCode::InternalError.code(),
            RpcError::Remote { code, .. } => *code,
            RpcError::Timeout => ErrorCode::Timeout.code(),
            RpcError::Cancelled => ErrorCode::RequestCancelled.code(),
            RpcError::Unknown(_) | RpcError::Transport(_) | RpcError::ConnectionClosed => {
                ErrorCode::UnknownError.code()
            }
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            RpcError::Remote {
                code,
                message,
                data,
            } => ErrorObject {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => ErrorObject {
                code: other.code(),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl From<&RpcError> for ErrorObject {
    fn from(error: &RpcError) -> Self {
        error.to_error_object()
    }
}

impl From<ErrorObject> for RpcError {
    fn from(error: ErrorObject) -> Self {
        RpcError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

// ============================================================================
// Message types
// ============================================================================

/// Request identifier: numbers and strings are both valid on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

/// Exactly one of result or error
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only for errors about a request whose id could not be read
    pub id: Option<RequestId>,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// Any message that can cross the transport
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Response {
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(error) => Err(error.into()),
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

fn validate_method(method: &str) -> Result<(), RpcError> {
    if method.is_empty() {
        return Err(RpcError::InvalidRequest(
            "method must be a non-empty string".to_string(),
        ));
    }
    Ok(())
}

fn validate_params(params: &Option<Value>) -> Result<(), RpcError> {
    match params {
        None | Some(Value::Array(_)) | Some(Value::Object(_)) | Some(Value::Null) => Ok(()),
        Some(other) => Err(RpcError::InvalidParams(format!(
            "params must be structured, got {other}"
        ))),
    }
}

pub fn create_request(
    id: impl Into<RequestId>,
    method: &str,
    params: Option<Value>,
) -> Result<Request, RpcError> {
    validate_method(method)?;
    validate_params(&params)?;
    Ok(Request {
        id: id.into(),
        method: method.to_string(),
        params,
    })
}

pub fn create_response(id: RequestId, result: Value) -> Response {
    Response {
        id: Some(id),
        payload: ResponsePayload::Result(result),
    }
}

pub fn create_error_response(
    id: Option<RequestId>,
    code: ErrorCode,
    message: impl Into<String>,
    data: Option<Value>,
) -> Response {
    Response {
        id,
        payload: ResponsePayload::Error(ErrorObject {
            code: code.code(),
            message: message.into(),
            data,
        }),
    }
}

pub fn create_notification(method: &str, params: Option<Value>) -> Result<Notification, RpcError> {
    validate_method(method)?;
    validate_params(&params)?;
    Ok(Notification {
        method: method.to_string(),
        params,
    })
}

// ============================================================================
// Serialization
// ============================================================================

fn envelope() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        "jsonrpc".to_string(),
        Value::String(JSONRPC_VERSION.to_string()),
    );
    map
}

fn id_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::from(*n),
        RequestId::String(s) => Value::String(s.clone()),
    }
}

/// Serialize any message, re-validating it first
pub fn serialize(message: &RpcMessage) -> Result<String, RpcError> {
    let mut map = envelope();
    match message {
        RpcMessage::Request(request) => {
            validate_method(&request.method)?;
            validate_params(&request.params)?;
            map.insert("id".to_string(), id_value(&request.id));
            map.insert("method".to_string(), Value::String(request.method.clone()));
            if let Some(params) = &request.params {
                map.insert("params".to_string(), params.clone());
            }
        }
        RpcMessage::Response(response) => {
            map.insert(
                "id".to_string(),
                response.id.as_ref().map(id_value).unwrap_or(Value::Null),
            );
            match &response.payload {
                ResponsePayload::Result(result) => {
                    map.insert("result".to_string(), result.clone());
                }
                ResponsePayload::Error(error) => {
                    let error = serde_json::to_value(error)
                        .map_err(|e| RpcError::Internal(e.to_string()))?;
                    map.insert("error".to_string(), error);
                }
            }
        }
        RpcMessage::Notification(notification) => {
            validate_method(&notification.method)?;
            validate_params(&notification.params)?;
            map.insert(
                "method".to_string(),
                Value::String(notification.method.clone()),
            );
            if let Some(params) = &notification.params {
                map.insert("params".to_string(), params.clone());
            }
        }
    }
    serde_json::to_string(&Value::Object(map)).map_err(|e| RpcError::Internal(e.to_string()))
}

pub fn serialize_request(request: &Request) -> Result<String, RpcError> {
    serialize(&RpcMessage::Request(request.clone()))
}

pub fn serialize_response(response: &Response) -> Result<String, RpcError> {
    serialize(&RpcMessage::Response(response.clone()))
}

pub fn serialize_notification(notification: &Notification) -> Result<String, RpcError> {
    serialize(&RpcMessage::Notification(notification.clone()))
}

fn parse_id(value: &Value) -> Result<RequestId, RpcError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| RpcError::InvalidRequest(format!("unsupported numeric id {n}"))),
        Value::String(s) => Ok(RequestId::String(s.clone())),
        other => Err(RpcError::InvalidRequest(format!("invalid id {other}"))),
    }
}

/// Best-effort id extraction so an error response can still be correlated
pub fn peek_request_id(bytes: &[u8]) -> Option<RequestId> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    parse_id(value.get("id")?).ok()
}

/// Parse bytes into a message.
///
/// Malformed JSON fails with [`RpcError::Parse`]; well-formed JSON that is not
/// a JSON-RPC 2.0 message fails with [`RpcError::InvalidRequest`].
pub fn deserialize(bytes: &[u8]) -> Result<RpcMessage, RpcError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| RpcError::Parse(e.to_string()))?;

    let Value::Object(mut map) = value else {
        return Err(RpcError::InvalidRequest(
            "message must be a JSON object".to_string(),
        ));
    };

    match map.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(RpcError::InvalidRequest(format!(
                "unsupported jsonrpc version {other}"
            )));
        }
        None => {
            return Err(RpcError::InvalidRequest(
                "missing jsonrpc version".to_string(),
            ));
        }
    }

    if let Some(method) = map.remove("method") {
        let Value::String(method) = method else {
            return Err(RpcError::InvalidRequest(
                "method must be a string".to_string(),
            ));
        };
        validate_method(&method)?;
        let params = map.remove("params");
        validate_params(&params)?;

        return match map.get("id") {
            Some(id) => Ok(RpcMessage::Request(Request {
                id: parse_id(id)?,
                method,
                params,
            })),
            None => Ok(RpcMessage::Notification(Notification { method, params })),
        };
    }

    let id = match map.get("id") {
        None | Some(Value::Null) => None,
        Some(id) => Some(parse_id(id)?),
    };

    let payload = match (map.remove("result"), map.remove("error")) {
        (Some(result), None) => ResponsePayload::Result(result),
        (None, Some(error)) => ResponsePayload::Error(
            serde_json::from_value(error)
                .map_err(|e| RpcError::InvalidRequest(format!("malformed error object: {e}")))?,
        ),
        (Some(_), Some(_)) => {
            return Err(RpcError::InvalidRequest(
                "response carries both result and error".to_string(),
            ));
        }
        (None, None) => {
            return Err(RpcError::InvalidRequest(
                "message is neither request, response nor notification".to_string(),
            ));
        }
    };

    Ok(RpcMessage::Response(Response { id, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reserialize(text: &str) -> String {
        let message = deserialize(text.as_bytes()).unwrap();
        serialize(&message).unwrap()
    }

    #[test]
    fn test_round_trip_is_stable() {
        let messages = vec![
            RpcMessage::Request(
                create_request(7, "extensionHost.$provideHover", Some(json!({"a": 1}))).unwrap(),
            ),
            RpcMessage::Request(create_request("abc", "m", None).unwrap()),
            RpcMessage::Response(create_response(RequestId::Number(3), Value::Null)),
            RpcMessage::Response(create_error_response(
                Some(RequestId::Number(4)),
                ErrorCode::MethodNotFound,
                "nope",
                Some(json!({"method": "x"})),
            )),
            RpcMessage::Notification(
                create_notification("extensionHost.onDidOpenTextDocument", Some(json!([1, 2])))
                    .unwrap(),
            ),
        ];

        for message in messages {
            let first = serialize(&message).unwrap();
            assert_eq!(reserialize(&first), first);
            assert_eq!(deserialize(first.as_bytes()).unwrap(), message);
        }
    }

    #[test]
    fn test_null_result_is_not_an_absent_result() {
        let message = deserialize(br#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        match message {
            RpcMessage::Response(response) => {
                assert_eq!(response.payload, ResponsePayload::Result(Value::Null));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_method_rejected_at_construction() {
        assert!(matches!(
            create_request(1, "", None),
            Err(RpcError::InvalidRequest(_))
        ));
        assert!(matches!(
            create_notification("", None),
            Err(RpcError::InvalidRequest(_))
        ));

        let request = RpcMessage::Request(Request {
            id: RequestId::Number(1),
            method: String::new(),
            params: None,
        });
        assert!(matches!(serialize(&request), Err(RpcError::InvalidRequest(_))));
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        assert!(matches!(deserialize(b"{not json"), Err(RpcError::Parse(_))));
    }

    #[test]
    fn test_unrecognized_payloads_are_invalid_requests() {
        let cases: [&[u8]; 5] = [
            br#"[1,2,3]"#,
            br#"{"jsonrpc":"1.0","id":1,"method":"m"}"#,
            br#"{"id":1,"method":"m"}"#,
            br#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":1,"message":"x"}}"#,
            br#"{"jsonrpc":"2.0","id":1}"#,
        ];
        for case in cases {
            assert!(
                matches!(deserialize(case), Err(RpcError::InvalidRequest(_))),
                "expected InvalidRequest for {}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::from_code(-32601), Some(ErrorCode::MethodNotFound));
        assert_eq!(ErrorCode::from_code(-32002), Some(ErrorCode::Timeout));
        assert_eq!(ErrorCode::from_code(-32050), Some(ErrorCode::ServerError(-32050)));
        assert_eq!(ErrorCode::from_code(42), None);
        assert!(ErrorCode::is_server_error(-32000));
        assert!(!ErrorCode::is_server_error(-32100));
        assert_eq!(RpcError::Timeout.code(), -32002);
        assert_eq!(RpcError::Cancelled.code(), -32800);
    }

    #[test]
    fn test_peek_request_id() {
        assert_eq!(
            peek_request_id(br#"{"jsonrpc":"1.0","id":9,"method":"m"}"#),
            Some(RequestId::Number(9))
        );
        assert_eq!(peek_request_id(b"garbage"), None);
    }
}
