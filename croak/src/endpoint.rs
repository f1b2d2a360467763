use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::dispatch::{Handler, Outcome};
use crate::engine::{Engine, Service};
use crate::error::{Error, Result};
use crate::event::{Event, Relay, ResponseEvent};
use crate::platform::{self, Platform};
use crate::resource::{Entry, NewResource, Resource, ResourceId, ResourceTable};
use crate::resp::Reply;
use crate::session::{ClientSession, Protocol, SessionTable};
use crate::Message;

/// How long the I/O thread waits for traffic before
/// checking whether it should stop
const PUMP_TIMEOUT: Duration = Duration::from_millis(100);

/// Everything guarded by the endpoint lock
#[derive(Debug, Default)]
pub(crate) struct State {
  pub(crate) resources: ResourceTable,
  pub(crate) sessions: SessionTable,
}

/// State shared between an [`Endpoint`], its handles and its I/O thread
#[derive(Debug)]
pub(crate) struct Shared {
  me: Weak<Shared>,
  pub(crate) state: Mutex<State>,
  pub(crate) engine: Engine,
  pub(crate) relay: Relay,
}

impl Shared {
  fn resource(&self, id: ResourceId, uri: String) -> Resource {
    Resource { id,
               uri,
               shared: self.me.clone() }
  }

  fn session(&self, key: (IpAddr, u16, Protocol)) -> ClientSession {
    ClientSession { key,
                    shared: self.me.clone() }
  }
}

impl Service for Shared {
  fn respond(&self, handler: Handler, req: &Message) -> Reply {
    let (reply, created) = {
      let mut state = self.state.lock();
      let Outcome { reply, created } = handler(&mut state.resources, self.engine.routes(), req);
      let created = created.and_then(|id| {
                             state.resources
                                  .get(id)
                                  .map(|e| self.resource(id, e.uri.clone()))
                           });
      (reply, created)
    };

    if let Some(resource) = created {
      self.relay.push(Event::ResourceCreated(resource));
    }

    reply
  }

  fn deliver(&self, resp: ResponseEvent) {
    self.relay.push(Event::Response(resp))
  }
}

#[derive(Debug)]
struct Task {
  stop: Arc<AtomicBool>,
  handle: JoinHandle<()>,
}

/// A CoAP endpoint: a resource server, a set of client
/// sessions, and the thread that drives their traffic.
///
/// ```no_run
/// use std::net::Ipv4Addr;
///
/// use croak::{Config, ContentFormat, Endpoint, NewResource};
///
/// let endpoint = Endpoint::init(Config::server(Ipv4Addr::UNSPECIFIED.into())).unwrap();
///
/// let temp = endpoint.add_resource(NewResource::new("temp").media_type(ContentFormat::Text)
///                                                          .value("20"))
///                    .unwrap();
/// temp.set_value("21").unwrap();
/// ```
#[derive(Debug)]
pub struct Endpoint {
  shared: Arc<Shared>,
  task: Option<Task>,
}

impl Endpoint {
  /// Bind the endpoint's sockets and start its I/O thread
  pub fn init(cfg: Config) -> Result<Self> {
    Self::init_with(cfg, platform::Std)
  }

  /// [`Endpoint::init`] on a custom [`Platform`]
  pub fn init_with(cfg: Config, platform: impl Platform + 'static) -> Result<Self> {
    let engine = Engine::new(&cfg, Box::new(platform))?;
    let shared = Arc::new_cyclic(|me| Shared { me: me.clone(),
                                               state: Mutex::new(State::default()),
                                               engine,
                                               relay: Relay::default() });

    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
      let (shared, stop) = (shared.clone(), stop.clone());
      thread::Builder::new().name("croak-io".into())
                            .spawn(move || {
                              log::debug!(target: "croak", "i/o thread started");
                              while !stop.load(Ordering::Relaxed) {
                                shared.engine.pump(PUMP_TIMEOUT, &*shared);
                              }
                              log::debug!(target: "croak", "i/o thread stopped");
                            })
                            .map_err(Error::Bind)?
    };

    Ok(Self { shared,
              task: Some(Task { stop, handle }) })
  }

  /// Address of the listening socket; `None` for client-only endpoints
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.shared.engine.local_addr()
  }

  /// Add a resource, serving every method on it.
  ///
  /// Fails with [`Error::DuplicateResource`] when a resource
  /// with the same uri exists.
  pub fn add_resource(&self, new: NewResource) -> Result<Resource> {
    let mut state = self.shared.state.lock();
    let uri = new.uri.clone();
    let id = state.resources.insert(Entry::new(new))?;
    self.shared.engine.add_route(&uri);
    log::debug!(target: "croak", "added resource {:?}", uri);

    Ok(self.shared.resource(id, uri))
  }

  /// Remove a resource; `false` if there was none at `uri`.
  ///
  /// Existing [`Resource`] handles to it stop working.
  pub fn remove_resource(&self, uri: &str) -> bool {
    let mut state = self.shared.state.lock();
    match state.resources.remove(uri) {
      | Some(_) => {
        self.shared.engine.remove_route(uri);
        log::debug!(target: "croak", "removed resource {:?}", uri);
        true
      },
      | None => false,
    }
  }

  /// Find a resource by its exact uri
  pub fn resource(&self, uri: &str) -> Option<Resource> {
    let state = self.shared.state.lock();
    state.resources
         .find(uri)
         .map(|id| self.shared.resource(id, uri.to_string()))
  }

  /// Every resource, in the order they were added
  pub fn resources(&self) -> Vec<Resource> {
    let state = self.shared.state.lock();
    state.resources
         .ids()
         .filter_map(|id| state.resources.get(id).map(|e| (id, e.uri.clone())))
         .map(|(id, uri)| self.shared.resource(id, uri))
         .collect()
  }

  /// Open a session to `addr` for sending requests.
  ///
  /// `psk` and `identity` go together and make the session
  /// DTLS-secured. `port` defaults to 5683, or 5684 when secured;
  /// using either of those ports with the other kind of security
  /// fails with [`Error::PortSecurityMismatch`].
  pub fn new_client_session(&self,
                            addr: IpAddr,
                            port: Option<u16>,
                            psk: Option<Vec<u8>>,
                            identity: Option<String>)
                            -> Result<ClientSession> {
    let opening = self.shared.state.lock().sessions.check(addr, port, psk, identity)?;

    // handshakes can take a while; don't hold the lock for them
    let link = self.shared
                   .engine
                   .open_link(opening.dest(), opening.psk.as_ref())
                   .map_err(Error::SessionCreate)?;

    let inserted = self.shared.state.lock().sessions.insert(opening.key, link.clone());
    if let Err(e) = inserted {
      self.shared.engine.close_link(&link);
      return Err(e);
    }

    log::debug!(target: "croak", "opened client session {:?}", opening.key);
    Ok(self.shared.session(opening.key))
  }

  /// Close the session matching (`addr`, `port`, `protocol`)
  pub fn remove_client_session(&self, addr: IpAddr, port: u16, protocol: Protocol) -> Result<()> {
    let link = self.shared.state.lock().sessions.remove((addr, port, protocol))?;
    self.shared.engine.close_link(&link);
    Ok(())
  }

  /// Every client session, in the order they were created
  pub fn client_sessions(&self) -> Vec<ClientSession> {
    let state = self.shared.state.lock();
    state.sessions.keys().map(|k| self.shared.session(k)).collect()
  }

  /// Set the callback receiving responses (with a payload) to requests
  /// sent from this endpoint's client sessions, replacing any previous one.
  ///
  /// Callbacks run inside [`Endpoint::poll_events`] and [`Endpoint::wait_events`].
  /// Either one called from inside a callback returns `0` without running anything.
  pub fn on_response(&self, f: impl FnMut(ResponseEvent) + Send + 'static) {
    self.shared.relay.on_response(Some(Box::new(f)))
  }

  /// Set the callback receiving resources created by PUT requests
  /// (see [`Config::dynamic_resources`]), replacing any previous one.
  pub fn on_resource_created(&self, f: impl FnMut(Resource) + Send + 'static) {
    self.shared.relay.on_resource_created(Some(Box::new(f)))
  }

  /// Unregister both callbacks; events that arrive afterwards are dropped
  pub fn clear_callbacks(&self) {
    self.shared.relay.on_response(None);
    self.shared.relay.on_resource_created(None);
  }

  /// Run the callbacks of every queued event, returning how many ran
  pub fn poll_events(&self) -> usize {
    self.shared.relay.drain()
  }

  /// Wait up to `timeout` for an event, then run the callbacks
  /// of everything queued. Returns how many ran.
  pub fn wait_events(&self, timeout: Duration) -> usize {
    self.shared.relay.wait(timeout)
  }

  /// Stop the I/O thread, waiting for it to finish.
  ///
  /// Nothing is received or retransmitted afterwards. Called on drop.
  pub fn shutdown(&mut self) {
    if let Some(Task { stop, handle }) = self.task.take() {
      stop.store(true, Ordering::Relaxed);
      if handle.join().is_err() {
        log::error!(target: "croak", "i/o thread panicked");
      }
    }
  }
}

impl Drop for Endpoint {
  fn drop(&mut self) {
    self.shutdown()
  }
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;

  use toad_msg::{Payload, Token, Type};

  use super::*;
  use crate::option::known;
  use crate::req::{Method, Request};
  use crate::resp::code;
  use crate::test::{self, PlatformMock};
  use crate::{option, SetDetails, Value};

  const WAIT: Duration = Duration::from_secs(2);

  fn endpoint(cfg: Config) -> (Endpoint, PlatformMock) {
    let platform = PlatformMock::default();
    let ep = Endpoint::init_with(cfg, platform.clone()).unwrap();
    (ep, platform)
  }

  fn server() -> (Endpoint, PlatformMock) {
    endpoint(Config::server(Ipv4Addr::LOCALHOST.into()))
  }

  /// Wait for the I/O thread to send something
  fn sent(platform: &PlatformMock) -> Vec<crate::net::Addrd<Message>> {
    let start = std::time::Instant::now();
    loop {
      let sent = platform.server.take_sent();
      if !sent.is_empty() || start.elapsed() > WAIT {
        return sent;
      }
      thread::sleep(Duration::from_millis(5));
    }
  }

  #[test]
  fn resources_are_ordered_and_unique() {
    let (ep, _) = server();
    ep.add_resource(NewResource::new("a")).unwrap();
    ep.add_resource(NewResource::new("b")).unwrap();
    assert!(matches!(ep.add_resource(NewResource::new("a")),
                     Err(Error::DuplicateResource(_))));

    let uris = ep.resources()
                 .iter()
                 .map(|r| r.uri().to_string())
                 .collect::<Vec<_>>();
    assert_eq!(uris, vec!["a", "b"]);

    assert!(ep.remove_resource("a"));
    assert!(!ep.remove_resource("a"));
    assert!(ep.resource("a").is_none());
    assert_eq!(ep.resource("b").unwrap().uri(), "b");
  }

  #[test]
  fn handles_fail_once_removed() {
    let (ep, _) = server();
    let r = ep.add_resource(NewResource::new("a").value(5)).unwrap();
    assert_eq!(r.value().unwrap(), vec![5]);

    ep.remove_resource("a");
    assert!(matches!(r.value(), Err(Error::ResourceGone)));
    assert!(matches!(r.set_value(1), Err(Error::ResourceGone)));

    // a new resource at the same uri is not the old one
    ep.add_resource(NewResource::new("a")).unwrap();
    assert!(matches!(r.details(), Err(Error::ResourceGone)));
  }

  #[test]
  fn resource_handle_ops() {
    let (ep, _) = server();
    let r = ep.add_resource(NewResource::new("a")).unwrap();

    r.set_value(Value::from("hi")).unwrap();
    r.set_details(SetDetails::default().etag(true).max_age(Some(9))).unwrap();
    r.add_attribute("rt", "temperature-c").unwrap();

    let d = r.details().unwrap();
    assert_eq!(r.value().unwrap(), b"hi".to_vec());
    assert_eq!((d.etag, d.etag_value, d.max_age), (true, 1, Some(9)));
    assert_eq!(r.attributes().unwrap(),
               vec![("rt".to_string(), "temperature-c".to_string())]);

    r.enable(Method::Put | Method::Post, false).unwrap();
    assert_eq!(r.enabled().unwrap(), Method::Get | Method::Delete);
    assert_eq!(ep.resource("a").unwrap(), r);
  }

  #[test]
  fn serves_requests_in_background() {
    let (ep, platform) = server();
    ep.add_resource(NewResource::new("temp").value(20)).unwrap();

    platform.server.send_msg(test::addr(40000),
                             test::request(Type::Con, Method::Get.code(), 1, "temp"));

    let crate::net::Addrd(resp, _) = sent(&platform).remove(0);
    assert_eq!(resp.code, code::CONTENT);
    assert_eq!(resp.payload.0, vec![20]);
  }

  #[test]
  fn get_racing_delete_sees_whole_value_or_deleted() {
    let (ep, _) = server();
    let value = vec![7u8; 512];
    ep.add_resource(NewResource::new("big").value(value.clone()))
      .unwrap();

    let get = test::request(Type::Con, Method::Get.code(), 1, "big");
    let delete = test::request(Type::Con, Method::Delete.code(), 2, "big");

    thread::scope(|s| {
      s.spawn(|| {
         for _ in 0..200 {
           assert_eq!(ep.shared.respond(crate::dispatch::delete, &delete).code,
                      code::DELETED);
           ep.add_resource(NewResource::new("big").value(value.clone()))
             .ok();
         }
       });

      for _ in 0..200 {
        let reply = ep.shared.respond(crate::dispatch::get, &get);
        if reply.code == code::CONTENT {
          assert_eq!(reply.payload, value);
        } else {
          assert_eq!(reply.code, code::DELETED);
          assert_eq!(reply.payload, code::phrase(code::DELETED).unwrap().as_bytes());
        }
      }
    });
  }

  #[test]
  fn created_resources_are_relayed() {
    let (ep, platform) = endpoint(Config::server(Ipv4Addr::LOCALHOST.into()).dynamic_resources(true));
    let created = Arc::new(Mutex::new(vec![]));
    let c = created.clone();
    ep.on_resource_created(move |r: Resource| c.lock().push(r));

    let mut req = test::request(Type::Con, Method::Put.code(), 1, "sensors/new");
    req.payload = Payload(b"7".to_vec());
    platform.server.send_msg(test::addr(40000), req);

    assert_eq!(sent(&platform)[0].data().code, code::CREATED);
    assert_eq!(ep.wait_events(WAIT), 1);

    let created = created.lock();
    assert_eq!(created[0].uri(), "sensors/new");
    assert_eq!(created[0].value().unwrap(), b"7".to_vec());
    assert_eq!(ep.resource("sensors/new").as_ref(), Some(&created[0]));
  }

  #[test]
  fn sessions_and_responses() {
    let (ep, platform) = server();
    let got = Arc::new(Mutex::new(vec![]));
    let g = got.clone();
    ep.on_response(move |r: ResponseEvent| g.lock().push(r));

    let s = ep.new_client_session(Ipv4Addr::LOCALHOST.into(), Some(40000), None, None)
              .unwrap();
    assert_eq!(s.details(), (Ipv4Addr::LOCALHOST.into(), 40000, Protocol::Udp));
    assert!(matches!(ep.new_client_session(Ipv4Addr::LOCALHOST.into(), Some(40000), None, None),
                     Err(Error::DuplicateSession(..))));

    let id = s.send_request(&Request::get("temp").token([4])).unwrap();
    let crate::net::Addrd(req, to) = sent(&platform).remove(0);
    assert_eq!(to, test::addr(40000));
    assert_eq!(req.id, id);
    assert_eq!(option::first(&req, known::URI_PATH), Some(&b"temp"[..]));

    let mut resp = test::msg(Type::Ack, code::CONTENT, id.0);
    resp.token = Token([4u8].into_iter().collect());
    resp.payload = Payload(b"20".to_vec());
    platform.server.send_msg(test::addr(40000), resp);

    assert_eq!(ep.wait_events(WAIT), 1);
    assert_eq!(got.lock()[0].payload, b"20".to_vec());
    assert_eq!(got.lock()[0].id, id);

    ep.remove_client_session(Ipv4Addr::LOCALHOST.into(), 40000, Protocol::Udp)
      .unwrap();
    assert!(ep.client_sessions().is_empty());
    assert!(matches!(s.send_request(&Request::get("temp")),
                     Err(Error::SessionNotFound(..))));
    assert!(matches!(ep.remove_client_session(Ipv4Addr::LOCALHOST.into(), 40000, Protocol::Udp),
                     Err(Error::SessionNotFound(..))));
  }

  #[test]
  fn secured_session_validation() {
    let (ep, platform) = server();
    let ip = Ipv4Addr::LOCALHOST.into();

    let s = ep.new_client_session(ip, None, Some(b"k".to_vec()), Some("id".into()))
              .unwrap();
    assert_eq!(s.details(), (ip, 5684, Protocol::Dtls));
    assert_eq!(platform.secured.lock()[0].1.identity, "id");

    assert!(matches!(ep.new_client_session(ip, Some(5683), Some(b"k".to_vec()), Some("id".into())),
                     Err(Error::PortSecurityMismatch { port: 5683,
                                                       secured: true })));
    assert!(matches!(ep.new_client_session(ip, None, Some(b"k".to_vec()), None),
                     Err(Error::PskIdentityMismatch)));

    // failed validation leaves the table alone
    assert_eq!(ep.client_sessions(), vec![s]);
  }

  #[test]
  fn refused_handshake_adds_no_session() {
    let platform = PlatformMock { refuse: true,
                                  ..PlatformMock::default() };
    let ep = Endpoint::init_with(Config::client(), platform).unwrap();

    let err = ep.new_client_session(Ipv4Addr::LOCALHOST.into(),
                                    None,
                                    Some(b"k".to_vec()),
                                    Some("id".into()));
    assert!(matches!(err, Err(Error::SessionCreate(_))));
    assert!(ep.client_sessions().is_empty());
  }

  #[test]
  fn shutdown_stops_io() {
    let (mut ep, platform) = server();
    ep.add_resource(NewResource::new("temp")).unwrap();
    ep.shutdown();
    ep.shutdown();

    platform.server.send_msg(test::addr(40000),
                             test::request(Type::Con, Method::Get.code(), 1, "temp"));
    thread::sleep(Duration::from_millis(150));
    assert!(platform.server.take_sent().is_empty());
  }
}
