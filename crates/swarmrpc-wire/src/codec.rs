//! Protobuf-compatible envelope codec.
//!
//! Wire schema (field numbers and types are fixed by the protocol):
//!
//! ```text
//! Request  { 1: name string, 2: params bytes, 3: id uint32 }
//! Error    { 1: code int32, 2: message string, 3: data bytes }
//! Response { 1: id uint32, 2: result bytes, 3: error Error }
//! Message  { 1: request Request, 2: response Response }
//! ```
//!
//! Absent optional fields are omitted entirely, as are proto3 defaults
//! (empty `name`, `code` 0, response `id` 0), so a minimal notification is
//! the smallest possible frame. Unknown fields are skipped by wire type.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::varint::{get_uvarint, put_uvarint};

const WIRE_VARINT: u8 = 0;
const WIRE_I64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_I32: u8 = 5;

/// A named call on a remote peer. A request with no `id` is a
/// notification: no reply is expected or sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub name: String,
    pub params: Option<Bytes>,
    pub id: Option<u32>,
}

/// The reply correlated to a request by `id`. Exactly one of `result` and
/// `error` is meaningful; both absent means the method returned nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub id: u32,
    pub result: Option<Bytes>,
    pub error: Option<RpcError>,
}

/// Structured RPC error: the wire error payload and the typed failure
/// surfaced to callers of `request()`.
///
/// Codes at and below `-32000` are reserved for the protocol; application
/// methods may use any other code (0 by default).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Bytes>,
}

impl RpcError {
    /// Stream open or write failed before the request left this node.
    pub const SEND_FAILURE: i32 = -32000;
    /// The engine was stopped while the call was outstanding.
    pub const STOPPED: i32 = -32001;
    /// A remote method failed with a value that is not an error.
    pub const UNKNOWN: i32 = -32002;
    /// No response arrived within the configured window.
    pub const TIMED_OUT: i32 = -32003;
    /// The remote peer has no method registered under the requested name.
    pub const METHOD_NOT_FOUND: i32 = -32601;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Bytes) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn method_not_found() -> Self {
        Self::new(Self::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn timed_out() -> Self {
        Self::new(Self::TIMED_OUT, "Request timed out")
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED, "RPC module stopped")
    }

    pub fn send_failure(cause: impl std::fmt::Display) -> Self {
        Self::new(Self::SEND_FAILURE, cause.to_string())
    }
}

/// The top-level wire unit.
///
/// The request side wins if a peer sets both; an envelope with neither set
/// decodes successfully and routes as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub request: Option<Request>,
    pub response: Option<Response>,
}

impl Envelope {
    /// A request expecting exactly one response with the same id.
    pub fn request(name: impl Into<String>, id: u32, params: Option<Bytes>) -> Self {
        Self {
            request: Some(Request {
                name: name.into(),
                params,
                id: Some(id),
            }),
            response: None,
        }
    }

    /// A fire-and-forget request.
    pub fn notification(name: impl Into<String>, params: Option<Bytes>) -> Self {
        Self {
            request: Some(Request {
                name: name.into(),
                params,
                id: None,
            }),
            response: None,
        }
    }

    /// A successful response.
    pub fn response(id: u32, result: Option<Bytes>) -> Self {
        Self {
            request: None,
            response: Some(Response {
                id,
                result,
                error: None,
            }),
        }
    }

    /// A failed response.
    pub fn error_response(id: u32, error: RpcError) -> Self {
        Self {
            request: None,
            response: Some(Response {
                id,
                result: None,
                error: Some(error),
            }),
        }
    }

    /// The canonical reply to a request naming an unregistered method.
    pub fn method_not_found(id: u32) -> Self {
        Self::error_response(id, RpcError::method_not_found())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        if let Some(request) = &self.request {
            let mut body = BytesMut::new();
            request.encode_body(&mut body);
            put_len_field(&mut buf, 1, &body);
        }
        if let Some(response) = &self.response {
            let mut body = BytesMut::new();
            response.encode_body(&mut body);
            put_len_field(&mut buf, 2, &body);
        }
        buf.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut src = buf;
        let mut envelope = Envelope::default();
        while !src.is_empty() {
            let (field, wire) = get_tag(&mut src)?;
            match (field, wire) {
                (1, WIRE_LEN) => {
                    envelope.request = Some(Request::decode_body(get_len_bytes(&mut src)?)?);
                }
                (2, WIRE_LEN) => {
                    envelope.response = Some(Response::decode_body(get_len_bytes(&mut src)?)?);
                }
                (_, wire) => skip_field(&mut src, wire)?,
            }
        }
        Ok(envelope)
    }
}

impl Request {
    fn encode_body(&self, dst: &mut BytesMut) {
        if !self.name.is_empty() {
            put_len_field(dst, 1, self.name.as_bytes());
        }
        if let Some(params) = &self.params {
            put_len_field(dst, 2, params);
        }
        if let Some(id) = self.id {
            put_uint_field(dst, 3, u64::from(id));
        }
    }

    fn decode_body(mut body: &[u8]) -> Result<Self> {
        let mut request = Request::default();
        while !body.is_empty() {
            let (field, wire) = get_tag(&mut body)?;
            match (field, wire) {
                (1, WIRE_LEN) => request.name = get_string(&mut body)?,
                (2, WIRE_LEN) => {
                    request.params = Some(Bytes::copy_from_slice(get_len_bytes(&mut body)?));
                }
                (3, WIRE_VARINT) => request.id = Some(get_varint_value(&mut body)? as u32),
                (_, wire) => skip_field(&mut body, wire)?,
            }
        }
        Ok(request)
    }
}

impl Response {
    fn encode_body(&self, dst: &mut BytesMut) {
        if self.id != 0 {
            put_uint_field(dst, 1, u64::from(self.id));
        }
        if let Some(result) = &self.result {
            put_len_field(dst, 2, result);
        }
        if let Some(error) = &self.error {
            let mut body = BytesMut::new();
            error.encode_body(&mut body);
            put_len_field(dst, 3, &body);
        }
    }

    fn decode_body(mut body: &[u8]) -> Result<Self> {
        let mut response = Response::default();
        while !body.is_empty() {
            let (field, wire) = get_tag(&mut body)?;
            match (field, wire) {
                (1, WIRE_VARINT) => response.id = get_varint_value(&mut body)? as u32,
                (2, WIRE_LEN) => {
                    response.result = Some(Bytes::copy_from_slice(get_len_bytes(&mut body)?));
                }
                (3, WIRE_LEN) => {
                    response.error = Some(RpcError::decode_body(get_len_bytes(&mut body)?)?);
                }
                (_, wire) => skip_field(&mut body, wire)?,
            }
        }
        Ok(response)
    }
}

impl RpcError {
    fn encode_body(&self, dst: &mut BytesMut) {
        if self.code != 0 {
            // int32: sign-extended to 64 bits on the wire
            put_uint_field(dst, 1, self.code as i64 as u64);
        }
        if !self.message.is_empty() {
            put_len_field(dst, 2, self.message.as_bytes());
        }
        if let Some(data) = &self.data {
            put_len_field(dst, 3, data);
        }
    }

    fn decode_body(mut body: &[u8]) -> Result<Self> {
        let mut error = RpcError::new(0, "");
        while !body.is_empty() {
            let (field, wire) = get_tag(&mut body)?;
            match (field, wire) {
                (1, WIRE_VARINT) => error.code = get_varint_value(&mut body)? as i32,
                (2, WIRE_LEN) => error.message = get_string(&mut body)?,
                (3, WIRE_LEN) => {
                    error.data = Some(Bytes::copy_from_slice(get_len_bytes(&mut body)?));
                }
                (_, wire) => skip_field(&mut body, wire)?,
            }
        }
        Ok(error)
    }
}

fn put_tag(dst: &mut BytesMut, field: u32, wire: u8) {
    put_uvarint(dst, u64::from(field) << 3 | u64::from(wire));
}

fn put_len_field(dst: &mut BytesMut, field: u32, value: &[u8]) {
    put_tag(dst, field, WIRE_LEN);
    put_uvarint(dst, value.len() as u64);
    dst.extend_from_slice(value);
}

fn put_uint_field(dst: &mut BytesMut, field: u32, value: u64) {
    put_tag(dst, field, WIRE_VARINT);
    put_uvarint(dst, value);
}

fn get_tag(src: &mut &[u8]) -> Result<(u32, u8)> {
    let tag = get_uvarint(src)?.ok_or(WireError::Malformed("truncated field tag"))?;
    Ok(((tag >> 3) as u32, (tag & 0x7) as u8))
}

fn get_varint_value(src: &mut &[u8]) -> Result<u64> {
    get_uvarint(src)?.ok_or(WireError::Malformed("truncated varint field"))
}

fn get_len_bytes<'a>(src: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = get_uvarint(src)?.ok_or(WireError::Malformed("truncated field length"))? as usize;
    if src.len() < len {
        return Err(WireError::Malformed("field length past end of buffer"));
    }
    let (head, tail) = src.split_at(len);
    *src = tail;
    Ok(head)
}

fn get_string(src: &mut &[u8]) -> Result<String> {
    let bytes = get_len_bytes(src)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::Malformed("invalid utf-8 in string"))
}

fn skip_field(src: &mut &[u8], wire: u8) -> Result<()> {
    match wire {
        WIRE_VARINT => {
            get_varint_value(src)?;
        }
        WIRE_I64 => {
            if src.len() < 8 {
                return Err(WireError::Malformed("truncated fixed64 field"));
            }
            *src = &src[8..];
        }
        WIRE_LEN => {
            get_len_bytes(src)?;
        }
        WIRE_I32 => {
            if src.len() < 4 {
                return Err(WireError::Malformed("truncated fixed32 field"));
            }
            *src = &src[4..];
        }
        _ => return Err(WireError::Malformed("unsupported wire type")),
    }
    Ok(())
}
