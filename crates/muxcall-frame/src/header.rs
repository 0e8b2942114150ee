use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Result;

/// MessagePack encoding of nil. Bodies with no content encode to this byte.
pub const NIL: u8 = 0xc0;

/// Header preceding every request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub service: String,
    pub method: String,
    /// Client-assigned sequence number echoed back in the response.
    pub request_id: u64,
}

impl RequestHeader {
    pub fn new(service: impl Into<String>, method: impl Into<String>, request_id: u64) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            request_id,
        }
    }

    /// The `Service.Method` name this request targets.
    pub fn service_method(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

/// Header preceding every response body.
///
/// At most one of `failure` and `error` is non-empty. When either is set the
/// body is a placeholder and carries no reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub service: String,
    pub method: String,
    pub request_id: u64,
    /// Framework-level failure, such as an unknown service or a bad argument.
    #[serde(default)]
    pub failure: String,
    /// Error returned by the method itself.
    #[serde(default)]
    pub error: String,
}

impl ResponseHeader {
    /// A successful response to `request`.
    pub fn reply_to(request: &RequestHeader) -> Self {
        Self {
            service: request.service.clone(),
            method: request.method.clone(),
            request_id: request.request_id,
            failure: String::new(),
            error: String::new(),
        }
    }

    pub fn with_failure(mut self, failure: impl Into<String>) -> Self {
        self.failure = failure.into();
        self.error.clear();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self.failure.clear();
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_empty() && self.error.is_empty()
    }
}

/// Placeholder body. Encodes to a single nil byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Empty;

// Nil on the wire, not an empty array.
impl Serialize for Empty {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

/// Encode a value as MessagePack with named struct fields.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
}

/// Decode a MessagePack value.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
