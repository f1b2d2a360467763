use std::net::{IpAddr, SocketAddr};
use std::sync::Weak;

use indexmap::IndexMap;
use toad_msg::Id;

use crate::config::{DEFAULT_PORT, DEFAULT_SECURE_PORT};
use crate::endpoint::Shared;
use crate::engine::Link;
use crate::error::{Error, Result};
use crate::platform::Psk;
use crate::req::Request;

/// Transport security of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
  /// Plain UDP
  Udp,
  /// DTLS with a pre-shared key
  Dtls,
}

/// What identifies a client session
pub(crate) type SessionKey = (IpAddr, u16, Protocol);

/// A validated request to open a session
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Opening {
  pub(crate) key: SessionKey,
  pub(crate) psk: Option<Psk>,
}

impl Opening {
  pub(crate) fn dest(&self) -> SocketAddr {
    SocketAddr::new(self.key.0, self.key.1)
  }
}

/// Client sessions, in the order they were created
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
  sessions: IndexMap<SessionKey, Link>,
}

impl SessionTable {
  /// Check the arguments of a new session against the table,
  /// without touching it.
  pub(crate) fn check(&self,
                      addr: IpAddr,
                      port: Option<u16>,
                      psk: Option<Vec<u8>>,
                      identity: Option<String>)
                      -> Result<Opening> {
    let psk = match (psk, identity) {
      | (Some(key), Some(identity)) => Some(Psk { key, identity }),
      | (None, None) => None,
      | _ => return Err(Error::PskIdentityMismatch),
    };

    let secured = psk.is_some();
    let port = port.unwrap_or(if secured {
                                DEFAULT_SECURE_PORT
                              } else {
                                DEFAULT_PORT
                              });

    if (port == DEFAULT_PORT && secured) || (port == DEFAULT_SECURE_PORT && !secured) {
      return Err(Error::PortSecurityMismatch { port, secured });
    }

    let protocol = if secured { Protocol::Dtls } else { Protocol::Udp };
    let key = (addr, port, protocol);
    if self.sessions.contains_key(&key) {
      return Err(Error::DuplicateSession(addr, port, protocol));
    }

    Ok(Opening { key, psk })
  }

  pub(crate) fn insert(&mut self, key: SessionKey, link: Link) -> Result<()> {
    if self.sessions.contains_key(&key) {
      return Err(Error::DuplicateSession(key.0, key.1, key.2));
    }

    self.sessions.insert(key, link);
    Ok(())
  }

  pub(crate) fn link(&self, key: &SessionKey) -> Option<&Link> {
    self.sessions.get(key)
  }

  /// Detach a session, keeping the order of the rest
  pub(crate) fn remove(&mut self, key: SessionKey) -> Result<Link> {
    self.sessions
        .shift_remove(&key)
        .ok_or(Error::SessionNotFound(key.0, key.1, key.2))
  }

  pub(crate) fn keys(&self) -> impl Iterator<Item = SessionKey> + '_ {
    self.sessions.keys().copied()
  }
}

/// Handle to an outbound session created with
/// [`Endpoint::new_client_session`](crate::Endpoint::new_client_session).
///
/// ```no_run
/// use std::net::Ipv4Addr;
///
/// use croak::req::Request;
/// use croak::{Config, Endpoint};
///
/// let endpoint = Endpoint::init(Config::client()).unwrap();
/// endpoint.on_response(|resp| println!("{:?}", resp.payload_str()));
///
/// let session = endpoint.new_client_session(Ipv4Addr::LOCALHOST.into(), None, None, None)
///                       .unwrap();
/// session.send_request(&Request::get("temp")).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ClientSession {
  pub(crate) key: SessionKey,
  pub(crate) shared: Weak<Shared>,
}

impl PartialEq for ClientSession {
  fn eq(&self, other: &Self) -> bool {
    self.key == other.key && Weak::ptr_eq(&self.shared, &other.shared)
  }
}

impl ClientSession {
  /// Remote address, remote port and transport security of this session
  pub fn details(&self) -> (IpAddr, u16, Protocol) {
    self.key
  }

  /// Send a confirmable request to the session's peer.
  ///
  /// Returns the message id, which the peer's response
  /// (see [`Endpoint::on_response`](crate::Endpoint::on_response)) carries
  /// when it is piggybacked on the acknowledgement.
  pub fn send_request(&self, req: &Request) -> Result<Id> {
    let (addr, port, protocol) = self.key;
    let gone = || Error::SessionNotFound(addr, port, protocol);

    let shared = self.shared.upgrade().ok_or_else(gone)?;
    let link = shared.state.lock().sessions.link(&self.key).cloned().ok_or_else(gone)?;

    let msg = req.to_message(link.dest)?;
    shared.engine.send_request(&link, msg)
  }
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;
  use std::sync::Arc;

  use super::*;
  use crate::test::{self, SockMock};

  const IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

  fn link(port: u16) -> Link {
    Link { sock: Arc::new(SockMock::new(test::addr(1))),
           dest: test::addr(port) }
  }

  fn psk() -> Option<Vec<u8>> {
    Some(b"secret".to_vec())
  }

  fn id() -> Option<String> {
    Some("me".into())
  }

  #[test]
  fn default_ports() {
    let t = SessionTable::default();
    assert_eq!(t.check(IP, None, None, None).unwrap().key,
               (IP, DEFAULT_PORT, Protocol::Udp));

    let open = t.check(IP, None, psk(), id()).unwrap();
    assert_eq!(open.key, (IP, DEFAULT_SECURE_PORT, Protocol::Dtls));
    assert_eq!(open.psk.as_ref().unwrap().identity, "me");
    assert_eq!(open.dest(), SocketAddr::new(IP, DEFAULT_SECURE_PORT));
  }

  #[test]
  fn psk_requires_identity() {
    let t = SessionTable::default();
    assert!(matches!(t.check(IP, None, psk(), None), Err(Error::PskIdentityMismatch)));
    assert!(matches!(t.check(IP, None, None, id()), Err(Error::PskIdentityMismatch)));
  }

  #[test]
  fn well_known_ports_must_match_security() {
    let t = SessionTable::default();
    assert!(matches!(t.check(IP, Some(5683), psk(), id()),
                     Err(Error::PortSecurityMismatch { port: 5683,
                                                       secured: true })));
    assert!(matches!(t.check(IP, Some(5684), None, None),
                     Err(Error::PortSecurityMismatch { port: 5684,
                                                       secured: false })));

    // any other port goes
    assert!(t.check(IP, Some(9999), psk(), id()).is_ok());
    assert!(t.check(IP, Some(9999), None, None).is_ok());
  }

  #[test]
  fn duplicates_are_rejected() {
    let mut t = SessionTable::default();
    let key = t.check(IP, None, None, None).unwrap().key;
    t.insert(key, link(5683)).unwrap();

    assert!(matches!(t.check(IP, None, None, None),
                     Err(Error::DuplicateSession(_, 5683, Protocol::Udp))));
    assert!(matches!(t.insert(key, link(5683)), Err(Error::DuplicateSession(..))));

    // same address, another port
    assert!(t.check(IP, Some(7000), None, None).is_ok());
  }

  #[test]
  fn remove_keeps_order() {
    let mut t = SessionTable::default();
    let keys = [(IP, 1, Protocol::Udp), (IP, 2, Protocol::Dtls), (IP, 3, Protocol::Udp)];
    keys.iter().for_each(|k| t.insert(*k, link(k.1)).unwrap());

    assert_eq!(t.remove(keys[1]).unwrap().dest, test::addr(2));
    assert_eq!(t.keys().collect::<Vec<_>>(), vec![keys[0], keys[2]]);
    assert!(matches!(t.remove(keys[1]), Err(Error::SessionNotFound(_, 2, Protocol::Dtls))));
  }
}
