use std::fmt::Debug;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// Data that came from (or is headed to) a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Turn the entire structure into something else
  pub fn fold<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> R {
    f(self.0, self.1)
  }
}

/// A datagram socket the endpoint can drive.
///
/// All operations are non-blocking; "nothing to do right now" is
/// reported as [`nb::Error::WouldBlock`].
///
/// Secured implementors encrypt in `send` and decrypt in `recv`,
/// so callers only ever see CoAP messages.
pub trait Socket: Send + Sync + Debug {
  /// Get the local address this socket is bound to
  fn local_addr(&self) -> io::Result<SocketAddr>;

  /// Send a message to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error>;

  /// Pull a buffered datagram from the socket, along with the address of the sender.
  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error>;

  /// Join a multicast group on the interface with address `iface`
  fn join_multicast_v4(&self, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()>;
}

pub(crate) fn io_to_nb(err: io::Error) -> nb::Error<io::Error> {
  match err.kind() {
    | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

pub(crate) fn nb_to_io(err: nb::Error<io::Error>) -> io::Error {
  match err {
    | nb::Error::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
    | nb::Error::Other(err) => err,
  }
}

impl Socket for UdpSocket {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    UdpSocket::local_addr(self)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    self.send_to(msg.data(), msg.addr())
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error> {
    self.recv_from(buf)
        .map(|(n, addr)| Addrd(n, addr))
        .map_err(io_to_nb)
  }

  fn join_multicast_v4(&self, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    UdpSocket::join_multicast_v4(self, &group, &iface)
  }
}
