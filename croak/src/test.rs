#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use toad_msg::{Code, Id, Payload, Token, TryIntoBytes, Type};

use crate::net::{Addrd, Socket};
use crate::option::{self, known};
use crate::platform::{Platform, Psk};
use crate::Message;

pub(crate) fn addr(port: u16) -> SocketAddr {
  (Ipv4Addr::LOCALHOST, port).into()
}

pub(crate) fn msg(ty: Type, code: Code, id: u16) -> Message {
  Message { ty,
            ver: Default::default(),
            code,
            id: Id(id),
            opts: Default::default(),
            payload: Payload(vec![]),
            token: Token(Default::default()) }
}

pub(crate) fn request(ty: Type, code: Code, id: u16, path: &str) -> Message {
  let mut m = msg(ty, code, id);
  path.split('/')
      .filter(|s| !s.is_empty())
      .for_each(|s| option::add(&mut m, known::URI_PATH, s.as_bytes().to_vec()));
  m
}

/// In-memory datagram socket.
///
/// Clones share their queues, so a test can keep one
/// and hand the other to the code under test.
#[derive(Debug, Clone)]
pub(crate) struct SockMock {
  pub addr: SocketAddr,
  pub rx: Arc<Mutex<VecDeque<Addrd<Vec<u8>>>>>,
  pub tx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
}

impl SockMock {
  pub fn new(addr: SocketAddr) -> Self {
    Self { addr,
           rx: Default::default(),
           tx: Default::default() }
  }

  /// Queue a message as if `from` had sent it to us
  pub fn send_msg(&self, from: SocketAddr, msg: Message) {
    let bytes = msg.try_into_bytes::<Vec<u8>>().unwrap();
    self.rx.lock().push_back(Addrd(bytes, from));
  }

  /// Queue raw bytes as if `from` had sent them to us
  pub fn send_bytes(&self, from: SocketAddr, bytes: &[u8]) {
    self.rx.lock().push_back(Addrd(bytes.to_vec(), from));
  }

  /// Take (and parse) everything sent through this socket so far
  pub fn take_sent(&self) -> Vec<Addrd<Message>> {
    self.tx
        .lock()
        .drain(..)
        .map(|dgram| dgram.map(|bytes| crate::parse::message(&bytes).unwrap()))
        .collect()
  }

  pub fn take_sent_bytes(&self) -> Vec<Addrd<Vec<u8>>> {
    self.tx.lock().drain(..).collect()
  }
}

impl Socket for SockMock {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    Ok(self.addr)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    self.tx.lock().push(msg.map(|bytes| bytes.to_vec()));
    Ok(())
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error> {
    let Addrd(bytes, from) = self.rx.lock().pop_front().ok_or(nb::Error::WouldBlock)?;
    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(Addrd(bytes.len(), from))
  }

  fn join_multicast_v4(&self, _: Ipv4Addr, _: Ipv4Addr) -> io::Result<()> {
    Ok(())
  }
}

/// [`Platform`] handing out [`SockMock`]s
#[derive(Debug, Clone)]
pub(crate) struct PlatformMock {
  pub server: SockMock,
  pub client: SockMock,
  /// Every secured socket handed out, with the credentials used
  pub secured: Arc<Mutex<Vec<(SockMock, Psk)>>>,
  /// Refuse to establish DTLS sessions
  pub refuse: bool,
}

impl Default for PlatformMock {
  fn default() -> Self {
    Self { server: SockMock::new(addr(5683)),
           client: SockMock::new(addr(50000)),
           secured: Default::default(),
           refuse: false }
  }
}

impl Platform for PlatformMock {
  fn bind(&self, _: SocketAddr, _: Option<&Psk>) -> io::Result<Arc<dyn Socket>> {
    Ok(Arc::new(self.server.clone()))
  }

  fn ephemeral(&self, _: SocketAddr) -> io::Result<Arc<dyn Socket>> {
    Ok(Arc::new(self.client.clone()))
  }

  fn connect(&self, _: SocketAddr, psk: &Psk) -> io::Result<Arc<dyn Socket>> {
    if self.refuse {
      return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
    }

    let mut secured = self.secured.lock();
    let sock = SockMock::new(addr(50001 + secured.len() as u16));
    secured.push((sock.clone(), psk.clone()));
    Ok(Arc::new(sock))
  }
}
