//! The CoAP message layer the endpoint runs on.
//!
//! The engine owns every socket, routes inbound requests to
//! handlers, provisions message ids and tokens for outbound
//! requests, retransmits confirmable messages until they are
//! acknowledged, and matches responses to the requests that
//! asked for them.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use embedded_time::Instant;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use toad_msg::{CodeKind, Id, Payload, Token, TryIntoBytes, Type};

use crate::config::{self, Config};
use crate::dispatch::{Handler, Route, Routes};
use crate::error::{Error, Result};
use crate::event::ResponseEvent;
use crate::logging::msg_summary;
use crate::net::{Addrd, Socket};
use crate::option;
use crate::parse;
use crate::platform::{Platform, Psk};
use crate::req::{Method, Methods};
use crate::resp::code::{METHOD_NOT_ALLOWED, NOT_FOUND};
use crate::resp::Reply;
use crate::retry::{RetryTimer, YouShould};
use crate::time::{self, Monotonic};
use crate::Message;

/// Largest datagram we expect to receive
const MAX_DGRAM: usize = 1152;

/// What the engine calls into when traffic arrives
pub(crate) trait Service {
  /// Run a request handler, producing the reply to send back
  fn respond(&self, handler: Handler, req: &Message) -> Reply;

  /// A response to one of our requests arrived
  fn deliver(&self, resp: ResponseEvent);
}

/// Where outbound requests of one client session go
#[derive(Debug, Clone)]
pub(crate) struct Link {
  pub(crate) sock: Arc<dyn Socket>,
  pub(crate) dest: SocketAddr,
}

fn same_sock(a: &Arc<dyn Socket>, b: &Arc<dyn Socket>) -> bool {
  Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
}

/// A request we sent and have not seen the response to
#[derive(Debug)]
struct Outbound {
  id: Id,
  token: Token,
  link: Link,
  bytes: Vec<u8>,
  /// When the request was sent, or when it was ACKed
  since: Instant<Monotonic>,
  /// `None` once ACKed; we then only wait for the separate response
  retry: Option<RetryTimer<Monotonic>>,
}

/// A confirmable message we received, and the bytes we answered it with
#[derive(Debug)]
struct Seen {
  at: Instant<Monotonic>,
  answer: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Exchanges {
  outbound: Vec<Outbound>,
  seen: HashMap<(SocketAddr, Id), Seen>,
}

/// See the [module docs](self)
#[derive(Debug)]
pub(crate) struct Engine {
  msg: config::Msg,
  poll_interval: Duration,
  clock: Monotonic,
  server: Option<Arc<dyn Socket>>,
  client: Arc<dyn Socket>,
  links: Mutex<Vec<Arc<dyn Socket>>>,
  routes: Mutex<Routes>,
  exchanges: Mutex<Exchanges>,
  next_id: AtomicU16,
  rand: Mutex<ChaCha8Rng>,
  platform: Box<dyn Platform>,
}

impl Engine {
  pub(crate) fn new(cfg: &Config, platform: Box<dyn Platform>) -> Result<Self> {
    let psk = cfg.server_psk()?;

    let server = match cfg.bind_addr()? {
      | Some(addr) => {
        let sock = platform.bind(addr, psk.as_ref()).map_err(Error::Bind)?;
        log::info!(target: "croak", "listening on {} (dtls: {})", addr, psk.is_some());

        if cfg.service_discovery {
          Self::join_all_coap_devices(&*sock, addr);
        }

        Some(sock)
      },
      | None => None,
    };

    let client = match (&server, &psk) {
      | (Some(sock), None) => sock.clone(),
      | (Some(sock), Some(_)) => {
        let like = sock.local_addr().map_err(Error::Bind)?;
        platform.ephemeral(like).map_err(Error::Bind)?
      },
      | (None, _) => platform.ephemeral((Ipv4Addr::UNSPECIFIED, 0).into())
                             .map_err(Error::Bind)?,
    };

    let mut routes = Routes::default();
    routes.create_on_put(cfg.dynamic_resources);

    let seed = cfg.msg.seed.unwrap_or_else(|| {
                               SystemTime::now().duration_since(UNIX_EPOCH)
                                                .map(|d| d.as_nanos() as u64)
                                                .unwrap_or_default()
                             });
    let mut rand = ChaCha8Rng::seed_from_u64(seed);

    Ok(Self { msg: cfg.msg,
              poll_interval: Duration::from_millis(cfg.poll_interval.0),
              clock: Monotonic::new(),
              server,
              client,
              links: Mutex::new(vec![]),
              routes: Mutex::new(routes),
              exchanges: Mutex::new(Exchanges::default()),
              next_id: AtomicU16::new(rand.gen()),
              rand: Mutex::new(rand),
              platform })
  }

  fn join_all_coap_devices(sock: &dyn Socket, addr: SocketAddr) {
    match addr.ip() {
      | IpAddr::V4(iface) => match sock.join_multicast_v4(crate::multicast::ALL_COAP_DEVICES_IP, iface) {
        | Ok(()) => log::info!(target: "croak",
                               "joined {} on {}",
                               crate::multicast::ALL_COAP_DEVICES_IP,
                               iface),
        | Err(e) => log::warn!(target: "croak", "failed to join multicast group: {}", e),
      },
      | IpAddr::V6(_) => {
        log::warn!(target: "croak", "service discovery is only supported on IPv4 endpoints")
      },
    }
  }

  /// Address of the listening socket, if there is one
  pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
    self.server.as_ref().and_then(|s| s.local_addr().ok())
  }

  pub(crate) fn routes(&self) -> &Mutex<Routes> {
    &self.routes
  }

  pub(crate) fn add_route(&self, uri: &str) {
    self.routes.lock().add(uri)
  }

  pub(crate) fn remove_route(&self, uri: &str) {
    self.routes.lock().remove(uri)
  }

  pub(crate) fn set_handlers(&self, uri: &str, methods: Methods, enabled: bool) {
    self.routes.lock().set(uri, methods, enabled)
  }

  pub(crate) fn handlers(&self, uri: &str) -> Methods {
    self.routes.lock().enabled(uri)
  }

  /// Get a way to reach `dest`; plain links share the client socket,
  /// secured links get a DTLS session of their own.
  pub(crate) fn open_link(&self, dest: SocketAddr, psk: Option<&Psk>) -> std::io::Result<Link> {
    match psk {
      | None => Ok(Link { sock: self.client.clone(),
                          dest }),
      | Some(psk) => {
        let sock = self.platform.connect(dest, psk)?;
        log::debug!(target: "croak", "dtls session established with {}", dest);
        self.links.lock().push(sock.clone());
        Ok(Link { sock, dest })
      },
    }
  }

  /// Forget a link, and any requests still waiting on it
  pub(crate) fn close_link(&self, link: &Link) {
    self.exchanges
        .lock()
        .outbound
        .retain(|o| !(o.link.dest == link.dest && same_sock(&o.link.sock, &link.sock)));

    if !same_sock(&link.sock, &self.client) {
      self.links.lock().retain(|s| !same_sock(s, &link.sock));
    }
  }

  fn next_id(&self) -> Id {
    Id(self.next_id.fetch_add(1, Ordering::Relaxed))
  }

  fn next_token(&self) -> Token {
    let n: u64 = self.rand.lock().gen();
    Token(n.to_be_bytes().into())
  }

  /// Send a request, keeping track of it until it is answered.
  ///
  /// The message id is always assigned here; a token is
  /// generated when the request has none.
  pub(crate) fn send_request(&self, link: &Link, mut msg: Message) -> Result<Id> {
    msg.id = self.next_id();
    if msg.token.0.is_empty() {
      msg.token = self.next_token();
    }

    let (id, token) = (msg.id, msg.token);
    let con = msg.ty == Type::Con;
    log::debug!(target: "croak", "{} -> {}", msg_summary(&msg), link.dest);

    let bytes = msg.try_into_bytes::<Vec<u8>>()
                   .map_err(|e| Error::BuildRequest(format!("{:?}", e)))?;

    let now = self.clock.now();
    let retry = con.then(|| {
                     RetryTimer::new(now,
                                     self.msg.con.retry_strategy,
                                     self.msg.con.max_attempts,
                                     self.rand.lock().gen())
                   });

    // tracked before sending, so a quick response can't beat us to it
    self.exchanges.lock().outbound.push(Outbound { id,
                                                   token,
                                                   link: link.clone(),
                                                   bytes: bytes.clone(),
                                                   since: now,
                                                   retry });

    match nb::block!(link.sock.send(Addrd(&bytes, link.dest))) {
      | Ok(()) => Ok(id),
      | Err(e) => {
        self.exchanges
            .lock()
            .outbound
            .retain(|o| !(o.id == id && o.link.dest == link.dest));
        Err(Error::Send(e))
      },
    }
  }

  fn sockets(&self) -> Vec<Arc<dyn Socket>> {
    let mut socks = self.server.iter().cloned().collect::<Vec<_>>();
    if !socks.iter().any(|s| same_sock(s, &self.client)) {
      socks.push(self.client.clone());
    }
    socks.extend(self.links.lock().iter().cloned());
    socks
  }

  /// Wait up to `timeout` for traffic, handle everything that
  /// arrived, then retransmit and expire exchanges as needed.
  pub(crate) fn pump(&self, timeout: Duration, service: &dyn Service) {
    let start = std::time::Instant::now();

    loop {
      if self.poll(service) {
        break;
      }

      let waited = start.elapsed();
      if waited >= timeout {
        break;
      }

      std::thread::sleep(self.poll_interval.min(timeout - waited));
    }

    self.housekeeping();
  }

  fn poll(&self, service: &dyn Service) -> bool {
    let mut buf = [0u8; MAX_DGRAM];
    let mut got_any = false;

    for sock in self.sockets() {
      loop {
        match sock.recv(&mut buf) {
          | Ok(Addrd(n, from)) => {
            got_any = true;
            self.dgram_recvd(&sock, Addrd(&buf[..n], from), service);
          },
          | Err(nb::Error::WouldBlock) => break,
          | Err(nb::Error::Other(e)) => {
            log::warn!(target: "croak", "recv failed: {}", e);
            break;
          },
        }
      }
    }

    got_any
  }

  fn dgram_recvd(&self, sock: &Arc<dyn Socket>, dgram: Addrd<&[u8]>, service: &dyn Service) {
    let msg = match parse::message(*dgram.data()) {
      | Ok(msg) => msg,
      | Err(e) => {
        log::warn!(target: "croak",
                   "dropping unparseable {} byte datagram from {}: {:?}",
                   dgram.data().len(),
                   dgram.addr(),
                   e);
        return;
      },
    };

    log::trace!(target: "croak", "{} <- {}", msg_summary(&msg), dgram.addr());

    let msg = Addrd(msg, dgram.addr());
    match msg.data().code.kind() {
      | CodeKind::Empty => self.empty_recvd(sock, msg),
      | CodeKind::Request => self.req_recvd(sock, msg, service),
      | CodeKind::Response => self.resp_recvd(sock, msg, service),
    }
  }

  fn send_raw(&self, sock: &Arc<dyn Socket>, bytes: &[u8], to: SocketAddr) {
    if let Err(e) = nb::block!(sock.send(Addrd(bytes, to))) {
      log::warn!(target: "croak", "failed to send to {}: {}", to, e);
    }
  }

  fn send_msg(&self, sock: &Arc<dyn Socket>, msg: Message, to: SocketAddr) -> Option<Vec<u8>> {
    log::debug!(target: "croak", "{} -> {}", msg_summary(&msg), to);
    match msg.try_into_bytes::<Vec<u8>>() {
      | Ok(bytes) => {
        self.send_raw(sock, &bytes, to);
        Some(bytes)
      },
      | Err(e) => {
        log::warn!(target: "croak", "failed to serialize message: {:?}", e);
        None
      },
    }
  }

  fn empty(ty: Type, id: Id) -> Message {
    Message { id,
              ty,
              ver: Default::default(),
              token: Token(Default::default()),
              code: toad_msg::Code::new(0, 0),
              opts: Default::default(),
              payload: Payload(vec![]) }
  }

  fn empty_recvd(&self, sock: &Arc<dyn Socket>, msg: Addrd<Message>) {
    let Addrd(msg, from) = msg;

    match msg.ty {
      | Type::Ack => {
        let now = self.clock.now();
        let mut ex = self.exchanges.lock();
        if let Some(o) = ex.outbound
                           .iter_mut()
                           .find(|o| o.id == msg.id && o.link.dest == from)
        {
          log::trace!(target: "croak", "{:?} was ACKed, waiting for response", msg.id);
          o.retry = None;
          o.since = now;
        }
      },
      | Type::Reset => {
        let mut ex = self.exchanges.lock();
        let before = ex.outbound.len();
        ex.outbound.retain(|o| !(o.id == msg.id && o.link.dest == from));
        if ex.outbound.len() < before {
          log::warn!(target: "croak", "{} reset {:?}", from, msg.id);
        }
      },
      // ping
      | Type::Con => {
        self.send_msg(sock, Self::empty(Type::Reset, msg.id), from);
      },
      | Type::Non => (),
    }
  }

  fn req_recvd(&self, sock: &Arc<dyn Socket>, req: Addrd<Message>, service: &dyn Service) {
    let Addrd(req, from) = req;
    let key = (from, req.id);

    {
      let mut ex = self.exchanges.lock();
      if ex.seen.contains_key(&key) {
        log::debug!(target: "croak", "duplicate {:?} from {}", req.id, from);
        let answer = ex.seen.get(&key).and_then(|s| s.answer.clone());
        drop(ex);
        if let Some(answer) = answer {
          self.send_raw(sock, &answer, from);
        }
        return;
      }

      // claimed before the handler runs, so a retransmission
      // arriving meanwhile is not handled twice
      ex.seen.insert(key,
                     Seen { at: self.clock.now(),
                            answer: None });
    }

    let reply = match Method::from_code(req.code) {
      | None => Reply::new(METHOD_NOT_ALLOWED),
      | Some(method) => {
        let path = option::path(&req);
        let route = self.routes.lock().route(path.as_deref(), method);

        match route {
          | Route::Found(handler) => service.respond(handler, &req),
          | Route::NotFound => Reply::new(NOT_FOUND),
          | Route::MethodNotAllowed => Reply::new(METHOD_NOT_ALLOWED),
        }
      },
    };

    let (ty, id) = match req.ty {
      | Type::Con => (Type::Ack, req.id),
      | _ => (Type::Non, self.next_id()),
    };

    let resp = Message { id,
                         ty,
                         ver: Default::default(),
                         token: req.token,
                         code: reply.code,
                         opts: reply.opts,
                         payload: Payload(reply.payload) };

    let bytes = self.send_msg(sock, resp, from);
    if req.ty == Type::Con {
      if let Some(seen) = self.exchanges.lock().seen.get_mut(&key) {
        seen.answer = bytes;
      }
    }
  }

  fn resp_recvd(&self, sock: &Arc<dyn Socket>, resp: Addrd<Message>, service: &dyn Service) {
    let Addrd(resp, from) = resp;
    let now = self.clock.now();
    let key = (from, resp.id);

    let matched = {
      let mut ex = self.exchanges.lock();

      let ix = ex.outbound.iter().position(|o| {
                                    o.link.dest == from
                                    && match resp.ty {
                                      | Type::Ack => o.id == resp.id,
                                      | _ => o.token == resp.token,
                                    }
                                  });
      let matched = ix.map(|ix| ex.outbound.remove(ix));

      if resp.ty == Type::Con {
        let repeat = ex.seen.get(&key).and_then(|s| s.answer.clone());
        drop(ex);

        match (&matched, repeat) {
          | (_, Some(ack)) => self.send_raw(sock, &ack, from),
          | (Some(_), None) => {
            let ack = self.send_msg(sock, Self::empty(Type::Ack, resp.id), from);
            self.exchanges.lock().seen.insert(key, Seen { at: now, answer: ack });
          },
          | (None, None) => {
            log::debug!(target: "croak", "unexpected response {:?} from {}", resp.id, from);
            self.send_msg(sock, Self::empty(Type::Reset, resp.id), from);
          },
        }
      }

      matched
    };

    match matched {
      | Some(_) if !resp.payload.0.is_empty() => {
        service.deliver(ResponseEvent { code: resp.code,
                                        id: resp.id,
                                        ty: resp.ty,
                                        token: resp.token,
                                        payload: resp.payload.0,
                                        from })
      },
      | Some(_) => (),
      | None => log::trace!(target: "croak", "ignoring unmatched {:?} from {}", resp.id, from),
    }
  }

  fn housekeeping(&self) {
    let now = self.clock.now();
    let lifetime = self.msg.exchange_lifetime;
    let mut ex = self.exchanges.lock();

    ex.outbound.retain_mut(|o| match o.retry.as_mut() {
                 | Some(retry) => match retry.what_should_i_do(now) {
                   | Ok(YouShould::Retry) => {
                     log::trace!(target: "croak",
                                 "retrying {:?} -> {} (attempt {})",
                                 o.id,
                                 o.link.dest,
                                 retry.attempts().0);
                     if let Err(nb::Error::Other(e)) = o.link.sock.send(Addrd(&o.bytes, o.link.dest)) {
                       log::warn!(target: "croak", "retransmission failed: {}", e);
                     }
                     true
                   },
                   | Ok(YouShould::Cry) => {
                     log::warn!(target: "croak",
                                "{:?} -> {} was never acknowledged, giving up",
                                o.id,
                                o.link.dest);
                     false
                   },
                   | Err(_) => true,
                 },
                 | None => time::elapsed(o.since, now) < lifetime,
               });

    ex.seen.retain(|_, s| time::elapsed(s.at, now) < lifetime);
  }

  #[cfg(test)]
  fn outstanding(&self) -> usize {
    self.exchanges.lock().outbound.len()
  }
}
