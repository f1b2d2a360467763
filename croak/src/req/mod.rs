use std::net::{IpAddr, SocketAddr};

use tinyvec::ArrayVec;
use toad_msg::{Id, Payload, Token, Type};

use crate::error::{Error, Result};
use crate::option::{self, known};
use crate::{ContentFormat, Message};

/// Request methods
pub mod method;

#[doc(inline)]
pub use method::{Method, Methods};

/// An outbound request, sent with
/// [`ClientSession::send_request`](crate::ClientSession::send_request).
///
/// ```
/// use croak::req::{Method, Request};
/// use croak::ContentFormat;
///
/// let req = Request::put("sensors/temp").content_format(ContentFormat::Text)
///                                       .payload("21")
///                                       .token([1, 2]);
///
/// assert_eq!(req.method, Method::Put);
/// assert!(req.include_options);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  /// Request method
  pub method: Method,
  /// Uri-Path of the target; split on `/` into one option per segment
  pub uri_path: Option<String>,
  /// Content-Format of the payload
  pub content_format: Option<ContentFormat>,
  /// Request body
  pub payload: Option<Vec<u8>>,
  /// Request token (at most 8 bytes)
  pub token: Option<Vec<u8>>,
  /// Whether to attach Uri-Host, Uri-Port, Uri-Path and Content-Format.
  ///
  /// Defaults to `true`.
  pub include_options: bool,
}

impl Request {
  /// Create a request with no path, payload or token
  pub fn new(method: Method) -> Self {
    Self { method,
           uri_path: None,
           content_format: None,
           payload: None,
           token: None,
           include_options: true }
  }

  /// Create a GET request
  pub fn get(path: impl AsRef<str>) -> Self {
    Self::new(Method::Get).path(path)
  }

  /// Create a PUT request
  pub fn put(path: impl AsRef<str>) -> Self {
    Self::new(Method::Put).path(path)
  }

  /// Create a POST request
  pub fn post(path: impl AsRef<str>) -> Self {
    Self::new(Method::Post).path(path)
  }

  /// Create a DELETE request
  pub fn delete(path: impl AsRef<str>) -> Self {
    Self::new(Method::Delete).path(path)
  }

  /// Set the Uri-Path
  pub fn path(mut self, path: impl AsRef<str>) -> Self {
    self.uri_path = Some(path.as_ref().to_string());
    self
  }

  /// Set the Content-Format
  pub fn content_format(mut self, format: ContentFormat) -> Self {
    self.content_format = Some(format);
    self
  }

  /// Set the payload
  pub fn payload(mut self, payload: impl AsRef<[u8]>) -> Self {
    self.payload = Some(payload.as_ref().to_vec());
    self
  }

  /// Set the token
  pub fn token(mut self, token: impl AsRef<[u8]>) -> Self {
    self.token = Some(token.as_ref().to_vec());
    self
  }

  /// Toggle [`Request::include_options`]
  pub fn include_options(mut self, include: bool) -> Self {
    self.include_options = include;
    self
  }

  /// Build a confirmable message addressed to `dest`.
  ///
  /// The message id is left at zero for the engine to provision.
  pub(crate) fn to_message(&self, dest: SocketAddr) -> Result<Message> {
    if let Some(cf) = self.content_format.filter(|cf| !cf.is_supported()) {
      return Err(Error::InvalidContentFormat(u16::from(cf) as i32));
    }

    let token = self.token.as_deref().unwrap_or_default();
    let token = ArrayVec::<[u8; 8]>::try_from(token).map_err(|_| {
                  Error::BuildRequest(format!("token is {} bytes, at most 8 are allowed",
                                              token.len()))
                })?;

    let mut msg = Message { ty: Type::Con,
                            ver: Default::default(),
                            code: self.method.code(),
                            id: Id(0),
                            opts: Default::default(),
                            payload: Payload(self.payload.clone().unwrap_or_default()),
                            token: Token(token) };

    if self.include_options {
      let host = match dest.ip() {
        | IpAddr::V4(ip) => ip.octets().to_vec(),
        | IpAddr::V6(ip) => ip.octets().to_vec(),
      };
      option::set(&mut msg, known::URI_HOST, host);
      option::set(&mut msg, known::URI_PORT, dest.port().to_be_bytes().to_vec());

      self.uri_path
          .iter()
          .flat_map(|p| p.split('/'))
          .filter(|seg| !seg.is_empty())
          .for_each(|seg| option::add(&mut msg, known::URI_PATH, seg.as_bytes().to_vec()));

      if let Some(cf) = self.content_format {
        option::set(&mut msg, known::CONTENT_FORMAT, cf.bytes().to_vec());
      }
    }

    Ok(msg)
  }
}
