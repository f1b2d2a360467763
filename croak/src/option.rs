use toad_msg::{OptNumber, OptValue};

use crate::error::{Error, Result};
use crate::Message;

/// Option numbers this endpoint reads or writes
pub mod known {
  use toad_msg::OptNumber;

  /// If-Match
  pub const IF_MATCH: OptNumber = OptNumber(1);
  /// Uri-Host
  pub const URI_HOST: OptNumber = OptNumber(3);
  /// ETag
  pub const ETAG: OptNumber = OptNumber(4);
  /// If-None-Match
  pub const IF_NONE_MATCH: OptNumber = OptNumber(5);
  /// Uri-Port
  pub const URI_PORT: OptNumber = OptNumber(7);
  /// Uri-Path
  pub const URI_PATH: OptNumber = OptNumber(11);
  /// Content-Format
  pub const CONTENT_FORMAT: OptNumber = OptNumber(12);
  /// Max-Age
  pub const MAX_AGE: OptNumber = OptNumber(14);
  /// Accept
  pub const ACCEPT: OptNumber = OptNumber(17);
}

/// Content-Format
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format`
  LinkFormat,
  /// `application/xml`
  Xml,
  /// `application/octet-stream`
  OctetStream,
  /// `application/rdf+xml`
  RdfXml,
  /// `application/exi`
  Exi,
  /// `application/json`
  Json,
  /// `application/cbor`
  Cbor,
  /// Another content format
  ///
  /// Produced when reading a Content-Format from an inbound
  /// message; outbound requests carrying one are refused
  /// with [`Error::InvalidContentFormat`].
  Other(u16),
}

impl ContentFormat {
  /// Convert this content format to the CoAP byte value
  pub fn bytes(&self) -> [u8; 2] {
    u16::from(self).to_be_bytes()
  }

  /// Validate a content-format code coming from an embedding layer,
  /// where `-1` means "no content format".
  ///
  /// Only the media types this endpoint advertises are accepted.
  ///
  /// ```
  /// use croak::ContentFormat;
  ///
  /// assert_eq!(ContentFormat::from_code(-1).unwrap(), None);
  /// assert_eq!(ContentFormat::from_code(50).unwrap(),
  ///            Some(ContentFormat::Json));
  /// assert!(ContentFormat::from_code(51).is_err());
  /// ```
  pub fn from_code(code: i32) -> Result<Option<Self>> {
    use ContentFormat::*;
    match code {
      | -1 => Ok(None),
      | 0 => Ok(Some(Text)),
      | 40 => Ok(Some(LinkFormat)),
      | 41 => Ok(Some(Xml)),
      | 42 => Ok(Some(OctetStream)),
      | 43 => Ok(Some(RdfXml)),
      | 47 => Ok(Some(Exi)),
      | 50 => Ok(Some(Json)),
      | 60 => Ok(Some(Cbor)),
      | other => Err(Error::InvalidContentFormat(other)),
    }
  }

  /// Whether this is one of the media types accepted by [`ContentFormat::from_code`]
  pub fn is_supported(&self) -> bool {
    !matches!(self, Self::Other(_))
  }
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    use ContentFormat::*;
    match n {
      | 0 => Text,
      | 40 => LinkFormat,
      | 41 => Xml,
      | 42 => OctetStream,
      | 43 => RdfXml,
      | 47 => Exi,
      | 50 => Json,
      | 60 => Cbor,
      | n => Other(n),
    }
  }
}

impl<'a> From<&'a ContentFormat> for u16 {
  fn from(f: &'a ContentFormat) -> Self {
    use ContentFormat::*;
    match *f {
      | Text => 0,
      | LinkFormat => 40,
      | Xml => 41,
      | OctetStream => 42,
      | RdfXml => 43,
      | Exi => 47,
      | Json => 50,
      | Cbor => 60,
      | Other(n) => n,
    }
  }
}

impl From<ContentFormat> for u16 {
  fn from(f: ContentFormat) -> Self {
    u16::from(&f)
  }
}

/// Encode an unsigned integer option value using
/// the fewest bytes possible (big-endian, zero is empty).
///
/// ```
/// use croak::option::encode_uint;
///
/// assert_eq!(encode_uint(0), Vec::<u8>::new());
/// assert_eq!(encode_uint(0x12), vec![0x12]);
/// assert_eq!(encode_uint(0x1234), vec![0x12, 0x34]);
/// ```
pub fn encode_uint(n: u32) -> Vec<u8> {
  let bytes = n.to_be_bytes();
  let skip = bytes.iter().take_while(|b| **b == 0).count();
  bytes[skip..].to_vec()
}

/// Decode a variable-length unsigned integer option value.
///
/// Empty values are zero, and values wider than 4 bytes keep
/// only their least significant 4 bytes.
pub fn decode_uint(bytes: &[u8]) -> u32 {
  bytes.iter().fold(0u32, |n, b| (n << 8) | *b as u32)
}

/// Get the first value of an option, if present
pub(crate) fn first(msg: &Message, num: OptNumber) -> Option<&[u8]> {
  msg.opts
     .get(&num)
     .and_then(|vals| vals.first())
     .map(|OptValue(v)| v.as_slice())
}

/// Whether an option is present, regardless of its value
pub(crate) fn has(msg: &Message, num: OptNumber) -> bool {
  msg.opts.get(&num).map(|vals| !vals.is_empty()).unwrap_or(false)
}

/// Read the first value of an option as an unsigned integer
pub(crate) fn uint(msg: &Message, num: OptNumber) -> Option<u32> {
  first(msg, num).map(decode_uint)
}

/// Replace all values of an option with one value
pub(crate) fn set(msg: &mut Message, num: OptNumber, value: Vec<u8>) {
  msg.opts.insert(num, vec![OptValue(value)]);
}

/// Append a value to a (repeatable) option
pub(crate) fn add(msg: &mut Message, num: OptNumber, value: Vec<u8>) {
  msg.opts.entry(num).or_default().push(OptValue(value));
}

/// Join the Uri-Path segments of a message with `/`.
///
/// Yields `None` when the message has no Uri-Path or a segment
/// is not valid UTF-8.
pub(crate) fn path(msg: &Message) -> Option<String> {
  let segments = msg.opts.get(&known::URI_PATH)?;
  if segments.is_empty() {
    return None;
  }

  segments.iter()
          .map(|OptValue(seg)| core::str::from_utf8(seg).ok())
          .collect::<Option<Vec<_>>>()
          .map(|segs| segs.join("/"))
}
