//! Minimal CoAP message model.
//!
//! The reliability core only needs to know a message's type, whether it is a
//! request or a response, and enough identity to log it. Option encoding and
//! wire serialization live outside this crate.

use std::fmt;

use crate::core::constants::{MAX_ETAG_LENGTH, MIN_ETAG_LENGTH};
use crate::core::CoapError;

/// CoAP message delivery type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Confirmable: retransmitted until acknowledged.
    Con,
    /// Non-confirmable: sent once.
    Non,
    /// Acknowledgement.
    Ack,
    /// Reset.
    Rst,
}

impl MessageType {
    /// Whether this type needs reliable delivery.
    pub fn is_confirmable(self) -> bool {
        self == MessageType::Con
    }
}

/// Request method code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// 0.01 GET
    Get,
    /// 0.02 POST
    Post,
    /// 0.03 PUT
    Put,
    /// 0.04 DELETE
    Delete,
}

/// Response code in `class.detail` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode {
    class: u8,
    detail: u8,
}

impl ResponseCode {
    /// 2.01 Created
    pub const CREATED: Self = Self::new(2, 1);
    /// 2.02 Deleted
    pub const DELETED: Self = Self::new(2, 2);
    /// 2.03 Valid
    pub const VALID: Self = Self::new(2, 3);
    /// 2.04 Changed
    pub const CHANGED: Self = Self::new(2, 4);
    /// 2.05 Content
    pub const CONTENT: Self = Self::new(2, 5);
    /// 4.00 Bad Request
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    /// 4.04 Not Found
    pub const NOT_FOUND: Self = Self::new(4, 4);
    /// 4.06 Not Acceptable
    pub const NOT_ACCEPTABLE: Self = Self::new(4, 6);
    /// 5.00 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    /// 5.03 Service Unavailable
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);

    /// Build a code from its class and detail.
    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// Code class (2, 4 or 5 for responses).
    pub fn class(&self) -> u8 {
        self.class
    }

    /// Code detail.
    pub fn detail(&self) -> u8 {
        self.detail
    }

    /// 2.xx codes.
    pub fn is_success(&self) -> bool {
        self.class == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

/// Validated ETag option value (1 to 8 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Etag(Vec<u8>);

impl Etag {
    /// Create an ETag, rejecting values outside the legal length range.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, CoapError> {
        let bytes = bytes.into();
        if !(MIN_ETAG_LENGTH..=MAX_ETAG_LENGTH).contains(&bytes.len()) {
            return Err(CoapError::InvalidEtagLength {
                min: MIN_ETAG_LENGTH,
                max: MAX_ETAG_LENGTH,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    /// Shortest big-endian encoding of `value`, without leading zero bytes.
    pub fn from_u64(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes
            .iter()
            .take_while(|b| **b == 0)
            .count()
            .min(bytes.len() - 1);
        Self(bytes[skip..].to_vec())
    }

    /// Raw option value.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An outgoing or incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    mtype: MessageType,
    method: Method,
    mid: Option<u16>,
    token: Vec<u8>,
    payload: Vec<u8>,
}

impl Request {
    /// Confirmable request with no token or payload.
    pub fn new(method: Method) -> Self {
        Self {
            mtype: MessageType::Con,
            method,
            mid: None,
            token: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Set the delivery type.
    pub fn with_type(mut self, mtype: MessageType) -> Self {
        self.mtype = mtype;
        self
    }

    /// Set the message ID.
    pub fn with_mid(mut self, mid: u16) -> Self {
        self.mid = Some(mid);
        self
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Delivery type.
    pub fn mtype(&self) -> MessageType {
        self.mtype
    }

    /// Change the delivery type in place.
    pub fn set_type(&mut self, mtype: MessageType) {
        self.mtype = mtype;
    }

    /// Request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Message ID, if already assigned.
    pub fn mid(&self) -> Option<u16> {
        self.mid
    }

    /// Token bytes.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// An outgoing or incoming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    mtype: MessageType,
    code: ResponseCode,
    mid: Option<u16>,
    token: Vec<u8>,
    payload: Vec<u8>,
    etag: Option<Etag>,
    observe: Option<u32>,
}

impl Response {
    /// Confirmable response with the given code.
    pub fn new(code: ResponseCode) -> Self {
        Self {
            mtype: MessageType::Con,
            code,
            mid: None,
            token: Vec::new(),
            payload: Vec::new(),
            etag: None,
            observe: None,
        }
    }

    /// Observe notification with sequence number `sequence`.
    ///
    /// Notifications travel as separate messages, so only CON and NON are
    /// legal types.
    pub fn notification(
        code: ResponseCode,
        mtype: MessageType,
        sequence: u32,
    ) -> Result<Self, CoapError> {
        match mtype {
            MessageType::Con | MessageType::Non => {
                let mut response = Self::new(code).with_type(mtype);
                response.observe = Some(sequence);
                Ok(response)
            }
            other => Err(CoapError::InvalidNotificationType(other)),
        }
    }

    /// Set the delivery type.
    pub fn with_type(mut self, mtype: MessageType) -> Self {
        self.mtype = mtype;
        self
    }

    /// Set the message ID.
    pub fn with_mid(mut self, mid: u16) -> Self {
        self.mid = Some(mid);
        self
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Attach an ETag.
    pub fn with_etag(mut self, etag: Etag) -> Self {
        self.etag = Some(etag);
        self
    }

    /// Delivery type.
    pub fn mtype(&self) -> MessageType {
        self.mtype
    }

    /// Change the delivery type in place.
    pub fn set_type(&mut self, mtype: MessageType) {
        self.mtype = mtype;
    }

    /// Response code.
    pub fn code(&self) -> ResponseCode {
        self.code
    }

    /// Message ID, if already assigned.
    pub fn mid(&self) -> Option<u16> {
        self.mid
    }

    /// Token bytes.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// ETag, if any.
    pub fn etag(&self) -> Option<&Etag> {
        self.etag.as_ref()
    }

    /// Observe sequence number for notifications.
    pub fn observe(&self) -> Option<u32> {
        self.observe
    }
}

/// Empty ACK or RST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyMessage {
    mtype: MessageType,
    mid: u16,
}

impl EmptyMessage {
    /// Create an empty message, which must be an ACK or RST.
    pub fn new(mtype: MessageType, mid: u16) -> Result<Self, CoapError> {
        match mtype {
            MessageType::Ack | MessageType::Rst => Ok(Self { mtype, mid }),
            other => Err(CoapError::InvalidEmptyMessageType(other)),
        }
    }

    /// Empty acknowledgement.
    pub fn ack(mid: u16) -> Self {
        Self {
            mtype: MessageType::Ack,
            mid,
        }
    }

    /// Reset.
    pub fn rst(mid: u16) -> Self {
        Self {
            mtype: MessageType::Rst,
            mid,
        }
    }

    /// ACK or RST.
    pub fn mtype(&self) -> MessageType {
        self.mtype
    }

    /// Message ID being acknowledged or reset.
    pub fn mid(&self) -> u16 {
        self.mid
    }
}

/// A request or response waiting in a send queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Client side.
    Request(Request),
    /// Server side.
    Response(Response),
}

impl OutboundMessage {
    /// Delivery type of the wrapped message.
    pub fn mtype(&self) -> MessageType {
        match self {
            OutboundMessage::Request(request) => request.mtype(),
            OutboundMessage::Response(response) => response.mtype(),
        }
    }

    /// Change the delivery type of the wrapped message.
    pub fn set_type(&mut self, mtype: MessageType) {
        match self {
            OutboundMessage::Request(request) => request.set_type(mtype),
            OutboundMessage::Response(response) => response.set_type(mtype),
        }
    }
}

impl From<Request> for OutboundMessage {
    fn from(request: Request) -> Self {
        OutboundMessage::Request(request)
    }
}

impl From<Response> for OutboundMessage {
    fn from(response: Response) -> Self {
        OutboundMessage::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_length_bounds() {
        assert!(Etag::new(vec![]).is_err());
        assert!(Etag::new(vec![1]).is_ok());
        assert!(Etag::new(vec![0; 8]).is_ok());

        let err = Etag::new(vec![0; 9]).unwrap_err();
        assert_eq!(
            err,
            CoapError::InvalidEtagLength {
                min: 1,
                max: 8,
                actual: 9
            }
        );
    }

    #[test]
    fn test_etag_from_u64_strips_leading_zeros() {
        assert_eq!(Etag::from_u64(0x0102).as_bytes(), &[0x01, 0x02]);
        assert_eq!(Etag::from_u64(0).as_bytes(), &[0x00]);
        assert_eq!(Etag::from_u64(u64::MAX).as_bytes().len(), 8);
    }

    #[test]
    fn test_notification_type() {
        assert!(Response::notification(ResponseCode::CONTENT, MessageType::Con, 1).is_ok());
        assert!(Response::notification(ResponseCode::CONTENT, MessageType::Non, 2).is_ok());
        assert_eq!(
            Response::notification(ResponseCode::CONTENT, MessageType::Ack, 3),
            Err(CoapError::InvalidNotificationType(MessageType::Ack))
        );
        assert!(Response::notification(ResponseCode::CONTENT, MessageType::Rst, 4).is_err());
    }

    #[test]
    fn test_empty_message_type() {
        assert!(EmptyMessage::new(MessageType::Ack, 1).is_ok());
        assert!(EmptyMessage::new(MessageType::Rst, 1).is_ok());
        assert!(EmptyMessage::new(MessageType::Con, 1).is_err());
    }

    #[test]
    fn test_response_code_display() {
        assert_eq!(ResponseCode::CONTENT.to_string(), "2.05");
        assert_eq!(ResponseCode::NOT_FOUND.to_string(), "4.04");
        assert!(ResponseCode::CHANGED.is_success());
        assert!(!ResponseCode::INTERNAL_SERVER_ERROR.is_success());
    }

    #[test]
    fn test_outbound_type() {
        let mut request = Request::new(Method::Get).with_type(MessageType::Non);
        assert_eq!(OutboundMessage::from(request.clone()).mtype(), MessageType::Non);
        request.set_type(MessageType::Con);
        assert!(request.mtype().is_confirmable());
    }
}
