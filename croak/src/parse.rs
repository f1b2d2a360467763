//! Datagram to [`Message`] parsing.
//!
//! `toad-msg` keys parsed options by number and keeps only the
//! last value of a repeated option, which loses every Uri-Path
//! segment but the final one. We let it parse the message, then
//! walk the option section again to collect every value.

use std::collections::BTreeMap;

use toad_cursor::Cursor;
use toad_msg::{MessageParseError, OptNumber, OptValue, TryFromBytes};

use crate::Message;

type Opts = BTreeMap<OptNumber, Vec<OptValue<Vec<u8>>>>;

/// Parse a datagram, keeping every instance of repeated options
pub(crate) fn message(dgram: &[u8]) -> Result<Message, MessageParseError> {
  let mut msg = Message::try_from_bytes(dgram)?;

  if let Some(opts) = opts(dgram) {
    msg.opts = opts;
  }

  Ok(msg)
}

/// Option delta or length, with its extended bytes
fn extended(nibble: u8, bytes: &mut Cursor<&[u8]>) -> Option<u32> {
  match nibble {
    | 13 => bytes.next().map(|n| n as u32 + 13),
    | 14 => bytes.take_exact(2)
                 .map(|b| u16::from_be_bytes([b[0], b[1]]) as u32 + 269),
    | 15 => None,
    | n => Some(n as u32),
  }
}

/// `None` if the option section is malformed
fn opts(dgram: &[u8]) -> Option<Opts> {
  let token_len = (dgram.first()? & 0x0F) as usize;

  let mut bytes = Cursor::new(dgram);
  if bytes.skip(4 + token_len) < 4 + token_len {
    return None;
  }

  let mut opts = Opts::new();
  let mut number = 0u32;

  loop {
    let head = match bytes.next() {
      | None | Some(0xFF) => break Some(opts),
      | Some(head) => head,
    };

    // delta (and its extended bytes) come before the length
    let delta = extended(head >> 4, &mut bytes)?;
    let len = extended(head & 0x0F, &mut bytes)? as usize;
    number += delta;

    let value = bytes.take_exact(len)?.to_vec();
    opts.entry(OptNumber(number))
        .or_default()
        .push(OptValue(value));
  }
}

#[cfg(test)]
mod tests {
  use toad_msg::{TryIntoBytes, Type};

  use super::*;
  use crate::option::{self, known};
  use crate::req::Method;
  use crate::test;

  #[test]
  fn multi_segment_path_survives_the_wire() {
    let mut put = test::request(Type::Con, Method::Put.code(), 7, "sensors/new");
    option::set(&mut put, known::CONTENT_FORMAT, vec![50]);
    assert_eq!(option::path(&put).as_deref(), Some("sensors/new"));

    let bytes = put.clone().try_into_bytes::<Vec<u8>>().unwrap();
    let parsed = message(&bytes).unwrap();

    assert_eq!(option::path(&parsed).as_deref(), Some("sensors/new"));
    assert_eq!(parsed.opts, put.opts);
    assert_eq!(parsed.id, put.id);
  }

  #[test]
  fn extended_deltas_and_lengths() {
    let mut msg = test::request(Type::Non, Method::Get.code(), 1, "a");
    // 11 -> 28 takes a 1 byte extended delta, 28 -> 2048 and the 300 byte value take 2
    option::add(&mut msg, OptNumber(28), vec![1]);
    option::add(&mut msg, OptNumber(2048), vec![7; 300]);
    option::add(&mut msg, OptNumber(2048), vec![8]);

    let bytes = msg.clone().try_into_bytes::<Vec<u8>>().unwrap();
    assert_eq!(message(&bytes).unwrap().opts, msg.opts);
  }

  #[test]
  fn malformed_datagrams_are_errors() {
    assert!(message(&[]).is_err());
    assert!(message(&[0x40]).is_err());
  }
}
