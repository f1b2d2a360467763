use core::fmt;
use core::ops::BitOr;

use toad_msg::Code;

use crate::error::{Error, Result};

/// Request method
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
  /// GET (0.01)
  Get,
  /// PUT (0.03)
  Put,
  /// POST (0.02)
  Post,
  /// DELETE (0.04)
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      | Method::Get => "GET",
      | Method::Put => "PUT",
      | Method::Post => "POST",
      | Method::Delete => "DELETE",
    };

    write!(f, "{}", s)
  }
}

impl Method {
  /// Every method, in handler-table order
  pub const ALL: [Method; 4] = [Method::Get, Method::Put, Method::Post, Method::Delete];

  /// Position of this method in a per-method handler table
  pub fn index(&self) -> usize {
    match self {
      | Method::Get => 0,
      | Method::Put => 1,
      | Method::Post => 2,
      | Method::Delete => 3,
    }
  }

  /// The single-bit flag embedding layers use to name this method
  pub fn flag(&self) -> u8 {
    1 << self.index()
  }

  /// Interpret a flag from an embedding layer.
  ///
  /// Exactly one of `0x01` (GET), `0x02` (PUT), `0x04` (POST)
  /// or `0x08` (DELETE) must be set.
  ///
  /// ```
  /// use croak::req::Method;
  ///
  /// assert_eq!(Method::from_flag(0x04).unwrap(), Method::Post);
  /// assert!(Method::from_flag(0x03).is_err());
  /// ```
  pub fn from_flag(flag: u8) -> Result<Method> {
    Method::ALL.into_iter()
               .find(|m| m.flag() == flag)
               .ok_or(Error::InvalidMethod(flag))
  }

  /// The message code for this method
  pub fn code(&self) -> Code {
    match self {
      | Method::Get => Code::new(0, 1),
      | Method::Post => Code::new(0, 2),
      | Method::Put => Code::new(0, 3),
      | Method::Delete => Code::new(0, 4),
    }
  }

  /// Get the method a request code names, if any
  pub fn from_code(code: Code) -> Option<Method> {
    match (code.class, code.detail) {
      | (0, 1) => Some(Method::Get),
      | (0, 2) => Some(Method::Post),
      | (0, 3) => Some(Method::Put),
      | (0, 4) => Some(Method::Delete),
      | _ => None,
    }
  }
}

/// A set of [`Method`]s, in the bitmask form used by embedding layers
///
/// ```
/// use croak::req::{Method, Methods};
///
/// let rw = Methods::from(Method::Get) | Method::Put;
/// assert!(rw.contains(Method::Put));
/// assert!(!rw.contains(Method::Delete));
/// assert_eq!(rw.bits(), 0x03);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Methods(u8);

impl Methods {
  /// No methods
  pub const NONE: Methods = Methods(0);
  /// GET, PUT, POST and DELETE
  pub const ALL: Methods = Methods(0x0F);

  /// Build from a bitmask; bits above DELETE are ignored
  pub fn from_bits(bits: u8) -> Methods {
    Methods(bits & Self::ALL.0)
  }

  /// The bitmask
  pub fn bits(&self) -> u8 {
    self.0
  }

  /// Is `method` in this set?
  pub fn contains(&self, method: Method) -> bool {
    self.0 & method.flag() != 0
  }

  /// Iterate over the methods in this set, in handler-table order
  pub fn iter(&self) -> impl Iterator<Item = Method> + '_ {
    Method::ALL.into_iter().filter(|m| self.contains(*m))
  }
}

impl From<Method> for Methods {
  fn from(m: Method) -> Self {
    Methods(m.flag())
  }
}

impl BitOr for Method {
  type Output = Methods;

  fn bitor(self, rhs: Method) -> Methods {
    Methods::from(self) | rhs
  }
}

impl BitOr<Method> for Methods {
  type Output = Methods;

  fn bitor(self, rhs: Method) -> Methods {
    Methods(self.0 | rhs.flag())
  }
}

impl BitOr for Methods {
  type Output = Methods;

  fn bitor(self, rhs: Methods) -> Methods {
    Methods(self.0 | rhs.0)
  }
}
