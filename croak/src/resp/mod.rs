use std::collections::BTreeMap;

use toad_msg::{OptNumber, OptValue};

use crate::option::{encode_uint, known};
use crate::resource::Entry;

/// Response codes
pub mod code;

#[doc(inline)]
pub use code::Code;

/// A response produced by a request handler, before it is
/// addressed and framed as a message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
  pub(crate) code: Code,
  pub(crate) opts: BTreeMap<OptNumber, Vec<OptValue<Vec<u8>>>>,
  pub(crate) payload: Vec<u8>,
}

impl Reply {
  /// A reply with no options and no body
  pub(crate) fn new(code: Code) -> Self {
    Self { code,
           opts: Default::default(),
           payload: vec![] }
  }

  /// A reply whose body is the code's reason phrase
  pub(crate) fn phrase(code: Code) -> Self {
    let mut reply = Self::new(code);
    reply.payload = code::phrase(code).unwrap_or_default().as_bytes().to_vec();
    reply
  }

  pub(crate) fn opt(&mut self, num: OptNumber, value: Vec<u8>) {
    self.opts.insert(num, vec![OptValue(value)]);
  }

  pub(crate) fn etag(&mut self, entry: &Entry) {
    if entry.etag {
      self.opt(known::ETAG, encode_uint(entry.etag_value as u32));
    }
  }

  /// Attach ETag, Content-Format and Max-Age, for whichever the resource has
  pub(crate) fn describe(&mut self, entry: &Entry) {
    self.etag(entry);

    if let Some(cf) = entry.media_type {
      self.opt(known::CONTENT_FORMAT, encode_uint(u16::from(cf) as u32));
    }

    if let Some(max_age) = entry.max_age {
      self.opt(known::MAX_AGE, encode_uint(max_age));
    }
  }

  /// Get the first value of an option
  #[cfg(test)]
  pub(crate) fn get(&self, num: OptNumber) -> Option<&[u8]> {
    self.opts
        .get(&num)
        .and_then(|v| v.first())
        .map(|OptValue(v)| v.as_slice())
  }
}
