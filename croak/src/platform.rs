use std::fmt::Debug;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use crate::net::Socket;

/// Pre-shared key credentials for DTLS.
///
/// Clients present `identity`; servers keep it as their identity hint.
#[derive(Clone, PartialEq, Eq)]
pub struct Psk {
  /// The key
  pub key: Vec<u8>,
  /// Client identity, or server identity hint
  pub identity: String,
}

impl Debug for Psk {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Psk")
     .field("key", &"<redacted>")
     .field("identity", &self.identity)
     .finish()
  }
}

/// Creates the sockets an endpoint talks through.
///
/// Every socket handed out must be non-blocking.
pub trait Platform: Send + Sync + Debug {
  /// Bind the endpoint's listening socket, secured with DTLS when `psk` is set
  fn bind(&self, addr: SocketAddr, psk: Option<&Psk>) -> io::Result<Arc<dyn Socket>>;

  /// Bind a plain socket on an ephemeral port, for outbound
  /// traffic of endpoints that don't listen in plain UDP.
  fn ephemeral(&self, like: SocketAddr) -> io::Result<Arc<dyn Socket>>;

  /// Establish a DTLS session with `dest`
  fn connect(&self, dest: SocketAddr, psk: &Psk) -> io::Result<Arc<dyn Socket>>;
}

/// [`Platform`] backed by `std::net` (and `openssl` for DTLS)
#[derive(Debug, Clone, Copy, Default)]
pub struct Std;

impl Std {
  fn udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let sock = UdpSocket::bind(addr)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }
}

impl Platform for Std {
  fn bind(&self, addr: SocketAddr, psk: Option<&Psk>) -> io::Result<Arc<dyn Socket>> {
    match psk {
      | None => Ok(Arc::new(Self::udp(addr)?)),
      #[cfg(feature = "dtls")]
      | Some(psk) => {
        let server = crate::dtls::Server::new(Self::udp(addr)?, psk.clone())?;
        Ok(Arc::new(server))
      },
      #[cfg(not(feature = "dtls"))]
      | Some(_) => Err(io::Error::new(io::ErrorKind::Unsupported,
                                      "croak was built without the `dtls` feature")),
    }
  }

  fn ephemeral(&self, like: SocketAddr) -> io::Result<Arc<dyn Socket>> {
    let any: SocketAddr = match like {
      | SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
      | SocketAddr::V6(_) => ([0u16; 8], 0).into(),
    };

    Ok(Arc::new(Self::udp(any)?))
  }

  #[cfg(feature = "dtls")]
  fn connect(&self, dest: SocketAddr, psk: &Psk) -> io::Result<Arc<dyn Socket>> {
    crate::dtls::Client::connect(dest, psk).map(|c| Arc::new(c) as Arc<dyn Socket>)
  }

  #[cfg(not(feature = "dtls"))]
  fn connect(&self, _: SocketAddr, _: &Psk) -> io::Result<Arc<dyn Socket>> {
    Err(io::Error::new(io::ErrorKind::Unsupported,
                       "croak was built without the `dtls` feature"))
  }
}
