use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// A named invocation of a registered service, with positional arguments.
///
/// Hosts send requests to the child's stdin; a child service sends them back
/// wrapped in a [`ResponseKind::Callback`] response when it needs the host to
/// do something on its behalf.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Args")]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Discriminant of a [`Response`], encoded as a small integer on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResponseKind {
    /// The service failed; the payload is a message string.
    Error,
    /// The service returned; the payload is its result.
    Return,
    /// The payload is a nested [`Request`] the peer should dispatch.
    Callback,
}

impl From<ResponseKind> for u8 {
    fn from(kind: ResponseKind) -> u8 {
        match kind {
            ResponseKind::Error => 0,
            ResponseKind::Return => 1,
            ResponseKind::Callback => 2,
        }
    }
}

/// Raised when a wire frame carries a `Type` tag outside `0..=2`.
#[derive(Clone, Debug, Error)]
#[error("unknown response type {0}")]
pub struct UnknownResponseKind(pub u8);

impl TryFrom<u8> for ResponseKind {
    type Error = UnknownResponseKind;

    fn try_from(tag: u8) -> Result<Self, UnknownResponseKind> {
        match tag {
            0 => Ok(ResponseKind::Error),
            1 => Ok(ResponseKind::Return),
            2 => Ok(ResponseKind::Callback),
            other => Err(UnknownResponseKind(other)),
        }
    }
}

/// The reply to a [`Request`], or a callback travelling in the reply's place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Type")]
    pub kind: ResponseKind,
    #[serde(rename = "Payload")]
    pub payload: Value,
}

impl Response {
    /// A successful reply carrying the service's result.
    pub fn ret(payload: Value) -> Self {
        Self {
            kind: ResponseKind::Return,
            payload,
        }
    }

    /// A failed reply carrying a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            payload: Value::String(message.into()),
        }
    }

    /// A nested request for the peer's own service table.
    pub fn callback(request: Request) -> Self {
        Self {
            kind: ResponseKind::Callback,
            payload: json!({ "Name": request.name, "Args": request.args }),
        }
    }

    /// The payload rendered as an error message.
    pub fn error_message(&self) -> String {
        match self.payload.as_str() {
            Some(message) => message.to_string(),
            None => self.payload.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_capitalized_wire_fields() {
        let request = Request::new("sum", vec![json!(1), json!("two")]);
        let wire = serde_json::to_string(&request).unwrap();
        assert_eq!(wire, r#"{"Name":"sum","Args":[1,"two"]}"#);

        let parsed: Request = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn response_kinds_encode_as_integers() {
        let wire = serde_json::to_string(&Response::ret(json!(42))).unwrap();
        assert_eq!(wire, r#"{"Type":1,"Payload":42}"#);

        let wire = serde_json::to_string(&Response::error("nope")).unwrap();
        assert_eq!(wire, r#"{"Type":0,"Payload":"nope"}"#);

        let wire =
            serde_json::to_string(&Response::callback(Request::new("get", vec![json!("k")])))
                .unwrap();
        assert_eq!(wire, r#"{"Type":2,"Payload":{"Args":["k"],"Name":"get"}}"#);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = serde_json::from_str::<Response>(r#"{"Type":7,"Payload":null}"#).unwrap_err();
        assert!(err.to_string().contains("unknown response type 7"));
    }

    #[test]
    fn error_message_stringifies_non_string_payloads() {
        assert_eq!(Response::error("boom").error_message(), "boom");

        let response = Response {
            kind: ResponseKind::Error,
            payload: json!({"code": 3}),
        };
        assert_eq!(response.error_message(), r#"{"code":3}"#);
    }
}
