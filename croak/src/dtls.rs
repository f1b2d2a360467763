use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use openssl::error::ErrorStack;
use openssl::ssl::{ErrorCode,
                   HandshakeError,
                   MidHandshakeSslStream,
                   Ssl,
                   SslContext,
                   SslContextBuilder,
                   SslMethod,
                   SslOptions,
                   SslStream,
                   SslVerifyMode};
use parking_lot::Mutex;

use crate::net::{io_to_nb, Addrd, Socket};
use crate::platform::Psk;

const CIPHERS: &str = "PSK-AES128-CCM8:PSK-AES128-CBC-SHA256";
const MTU: u32 = 1280;
const DGRAM_CAPACITY: usize = 1536;
const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_millis(500);
const HANDSHAKE_ROUNDS: usize = 12;

fn stack_to_io(e: ErrorStack) -> io::Error {
  io::Error::new(io::ErrorKind::Other, e)
}

fn ssl_to_nb(e: openssl::ssl::Error) -> nb::Error<io::Error> {
  match e.code() {
    | ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => nb::Error::WouldBlock,
    | _ => {
      nb::Error::Other(e.into_io_error()
                        .unwrap_or_else(|e| io::Error::new(io::ErrorKind::Other, e.to_string())))
    },
  }
}

fn context(method: SslMethod) -> Result<SslContextBuilder, ErrorStack> {
  let mut ctx = SslContext::builder(method)?;
  ctx.set_verify(SslVerifyMode::NONE);
  let opts = ctx.options();
  ctx.set_options(opts | SslOptions::NO_QUERY_MTU);
  ctx.set_cipher_list(CIPHERS)?;
  Ok(ctx)
}

fn write_key(key: &[u8], out: &mut [u8]) -> Result<usize, ErrorStack> {
  if key.len() > out.len() {
    return Err(ErrorStack::get());
  }

  out[..key.len()].copy_from_slice(key);
  Ok(key.len())
}

/// A socket connected to a single peer
#[derive(Debug)]
struct Connected(UdpSocket);

impl Read for Connected {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.0.recv(buf)
  }
}

impl Write for Connected {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.send(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// DTLS-PSK session with one server
#[derive(Debug)]
pub(crate) struct Client {
  peer: SocketAddr,
  stream: Mutex<SslStream<Connected>>,
}

impl Client {
  /// Perform the handshake with `dest`, blocking until it
  /// completes or gives up.
  pub(crate) fn connect(dest: SocketAddr, psk: &Psk) -> io::Result<Client> {
    let any: SocketAddr = match dest {
      | SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
      | SocketAddr::V6(_) => ([0u16; 8], 0).into(),
    };
    let sock = UdpSocket::bind(any)?;
    sock.connect(dest)?;
    sock.set_read_timeout(Some(HANDSHAKE_READ_TIMEOUT))?;

    let mut ctx = context(SslMethod::dtls()).map_err(stack_to_io)?;
    let key = psk.key.clone();
    let identity = psk.identity.clone();
    ctx.set_psk_client_callback(move |_, _hint, id_out, key_out| {
         let id = identity.as_bytes();
         if id.len() + 1 > id_out.len() {
           return Err(ErrorStack::get());
         }

         // identity is read as a C string
         id_out[..id.len()].copy_from_slice(id);
         id_out[id.len()] = 0;
         write_key(&key, key_out)
       });

    let mut ssl = Ssl::new(&ctx.build()).map_err(stack_to_io)?;
    ssl.set_mtu(MTU).map_err(stack_to_io)?;

    let mut attempt = ssl.connect(Connected(sock));
    let mut rounds = 0;
    let stream = loop {
      match attempt {
        | Ok(stream) => break stream,
        | Err(HandshakeError::WouldBlock(mid)) if rounds < HANDSHAKE_ROUNDS => {
          rounds += 1;
          attempt = mid.handshake();
        },
        | Err(HandshakeError::WouldBlock(_)) => {
          return Err(io::Error::new(io::ErrorKind::TimedOut, "dtls handshake timed out"))
        },
        | Err(HandshakeError::SetupFailure(e)) => return Err(stack_to_io(e)),
        | Err(HandshakeError::Failure(mid)) => {
          return Err(io::Error::new(io::ErrorKind::ConnectionRefused,
                                    format!("dtls handshake failed: {}", mid.error())))
        },
      }
    };

    stream.get_ref().0.set_read_timeout(None)?;
    stream.get_ref().0.set_nonblocking(true)?;
    log::debug!(target: "croak", "dtls session with {} established", dest);

    Ok(Client { peer: dest,
                stream: Mutex::new(stream) })
  }
}

impl Socket for Client {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    self.stream.lock().get_ref().0.local_addr()
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    if msg.addr() != self.peer {
      return Err(nb::Error::Other(io::Error::new(io::ErrorKind::InvalidInput,
                                                 format!("session is bound to {}", self.peer))));
    }

    self.stream
        .lock()
        .ssl_write(msg.data())
        .map(|_| ())
        .map_err(ssl_to_nb)
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error> {
    self.stream
        .lock()
        .ssl_read(buf)
        .map(|n| Addrd(n, self.peer))
        .map_err(ssl_to_nb)
  }

  fn join_multicast_v4(&self, _: Ipv4Addr, _: Ipv4Addr) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported,
                       "cannot join a multicast group over a dtls session"))
  }
}

/// Datagrams exchanged with one peer over the server's shared socket
#[derive(Debug)]
struct Peer {
  sock: std::sync::Arc<UdpSocket>,
  addr: SocketAddr,
  inbox: VecDeque<Vec<u8>>,
}

impl Read for Peer {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    match self.inbox.pop_front() {
      | Some(dgram) => {
        let n = dgram.len().min(buf.len());
        buf[..n].copy_from_slice(&dgram[..n]);
        Ok(n)
      },
      | None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
    }
  }
}

impl Write for Peer {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.sock.send_to(buf, self.addr)
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

#[derive(Debug)]
enum Session {
  Handshaking(MidHandshakeSslStream<Peer>),
  Established(SslStream<Peer>),
}

/// DTLS-PSK listening socket.
///
/// Keeps one DTLS session per remote address; application data
/// from established sessions is decrypted into a queue that
/// [`Socket::recv`] drains.
#[derive(Debug)]
pub(crate) struct Server {
  sock: std::sync::Arc<UdpSocket>,
  ctx: SslContext,
  sessions: Mutex<HashMap<SocketAddr, Session>>,
  ready: Mutex<VecDeque<Addrd<Vec<u8>>>>,
}

impl Server {
  /// `sock` must already be non-blocking.
  ///
  /// The identity hint is not sent to clients; any identity
  /// is accepted as long as the client holds the key.
  pub(crate) fn new(sock: UdpSocket, psk: Psk) -> io::Result<Server> {
    let mut ctx = context(SslMethod::dtls()).map_err(stack_to_io)?;
    let key = psk.key;
    ctx.set_psk_server_callback(move |_, identity, key_out| {
         log::trace!(target: "croak",
                     "psk requested by {:?}",
                     identity.map(String::from_utf8_lossy));
         write_key(&key, key_out)
       });

    log::debug!(target: "croak", "dtls server using identity hint {:?}", psk.identity);

    Ok(Server { sock: std::sync::Arc::new(sock),
                ctx: ctx.build(),
                sessions: Default::default(),
                ready: Default::default() })
  }

  fn accept(&self, from: SocketAddr, dgram: Vec<u8>) -> Option<Session> {
    let mut ssl = match Ssl::new(&self.ctx) {
      | Ok(ssl) => ssl,
      | Err(e) => {
        log::warn!(target: "croak", "cannot create dtls session for {}: {}", from, e);
        return None;
      },
    };
    ssl.set_mtu(MTU).ok();

    let peer = Peer { sock: self.sock.clone(),
                      addr: from,
                      inbox: VecDeque::from([dgram]) };

    Self::progress(from, ssl.accept(peer))
  }

  fn progress(from: SocketAddr,
              attempt: Result<SslStream<Peer>, HandshakeError<Peer>>)
              -> Option<Session> {
    match attempt {
      | Ok(stream) => {
        log::debug!(target: "croak", "dtls session with {} established", from);
        Some(Session::Established(stream))
      },
      | Err(HandshakeError::WouldBlock(mid)) => Some(Session::Handshaking(mid)),
      | Err(HandshakeError::SetupFailure(e)) => {
        log::warn!(target: "croak", "dtls setup for {} failed: {}", from, e);
        None
      },
      | Err(HandshakeError::Failure(mid)) => {
        log::warn!(target: "croak", "dtls handshake with {} failed: {}", from, mid.error());
        None
      },
    }
  }

  /// Move a peer's session forward with a newly received datagram
  fn feed(&self, from: SocketAddr, dgram: Vec<u8>) {
    let mut sessions = self.sessions.lock();

    let session = match sessions.remove(&from) {
      | None => self.accept(from, dgram),
      | Some(Session::Handshaking(mut mid)) => {
        mid.get_mut().inbox.push_back(dgram);
        Self::progress(from, mid.handshake())
      },
      | Some(Session::Established(mut stream)) => {
        stream.get_mut().inbox.push_back(dgram);
        Some(Session::Established(stream))
      },
    };

    let session = match session {
      | Some(Session::Established(stream)) => self.drain(from, stream).map(Session::Established),
      | other => other,
    };

    if let Some(session) = session {
      sessions.insert(from, session);
    }
  }

  /// Decrypt everything buffered for an established session
  fn drain(&self, from: SocketAddr, mut stream: SslStream<Peer>) -> Option<SslStream<Peer>> {
    let mut buf = [0u8; DGRAM_CAPACITY];
    loop {
      match stream.ssl_read(&mut buf) {
        | Ok(n) => self.ready.lock().push_back(Addrd(buf[..n].to_vec(), from)),
        | Err(e) if e.code() == ErrorCode::WANT_READ => break Some(stream),
        | Err(e) if e.code() == ErrorCode::ZERO_RETURN => {
          log::debug!(target: "croak", "dtls session with {} closed", from);
          break None;
        },
        | Err(e) => {
          log::warn!(target: "croak", "dropping dtls session with {}: {}", from, e);
          break None;
        },
      }
    }
  }
}

impl Socket for Server {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    self.sock.local_addr()
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    match self.sessions.lock().get_mut(&msg.addr()) {
      | Some(Session::Established(stream)) => {
        stream.ssl_write(msg.data()).map(|_| ()).map_err(ssl_to_nb)
      },
      | _ => Err(nb::Error::Other(io::Error::new(io::ErrorKind::NotConnected,
                                                 format!("no dtls session with {}",
                                                         msg.addr())))),
    }
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error> {
    let mut raw = [0u8; DGRAM_CAPACITY];
    loop {
      if let Some(Addrd(dgram, from)) = self.ready.lock().pop_front() {
        let n = dgram.len().min(buf.len());
        buf[..n].copy_from_slice(&dgram[..n]);
        return Ok(Addrd(n, from));
      }

      let (n, from) = self.sock.recv_from(&mut raw).map_err(io_to_nb)?;
      self.feed(from, raw[..n].to_vec());
    }
  }

  fn join_multicast_v4(&self, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    self.sock.join_multicast_v4(&group, &iface)
  }
}
