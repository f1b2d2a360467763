//! Hands responses and newly created resources from the
//! I/O thread over to user callbacks.
//!
//! Events are queued only while a callback for their kind is
//! registered, and callbacks run on whichever thread calls
//! [`Endpoint::poll_events`](crate::Endpoint::poll_events) or
//! [`Endpoint::wait_events`](crate::Endpoint::wait_events), never
//! while the endpoint's state is locked. A callback that polls
//! its own endpoint gets `0` back and nothing runs; the events
//! stay queued for the poll already in progress.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use toad_msg::{Code, Id, Token, Type};

use crate::resource::Resource;

/// A response to a request sent from a [`ClientSession`](crate::ClientSession)
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
  /// Response code
  pub code: Code,
  /// Message id of the response
  pub id: Id,
  /// Message type of the response
  pub ty: Type,
  /// Token, the same as the request's
  pub token: Token,
  /// Response body
  pub payload: Vec<u8>,
  /// Who sent the response
  pub from: SocketAddr,
}

impl ResponseEvent {
  /// The payload as UTF-8, if it is
  pub fn payload_str(&self) -> Option<&str> {
    core::str::from_utf8(&self.payload).ok()
  }

  /// Deserialize the payload as JSON
  #[cfg(feature = "std_serde_json")]
  pub fn json<'a, T: serde::Deserialize<'a>>(&'a self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.payload)
  }
}

#[derive(Debug)]
pub(crate) enum Event {
  Response(ResponseEvent),
  ResourceCreated(Resource),
}

type Callback<T> = Arc<Mutex<Box<dyn FnMut(T) + Send>>>;

struct Slot<T>(Mutex<Option<Callback<T>>>);

impl<T> Default for Slot<T> {
  fn default() -> Self {
    Self(Mutex::new(None))
  }
}

impl<T> Slot<T> {
  fn set(&self, f: Option<Box<dyn FnMut(T) + Send>>) {
    *self.0.lock() = f.map(|f| Arc::new(Mutex::new(f)));
  }

  fn is_set(&self) -> bool {
    self.0.lock().is_some()
  }

  fn call(&self, t: T) {
    let f = self.0.lock().clone();
    if let Some(f) = f {
      let mut f = f.lock();
      (*f)(t)
    }
  }
}

impl<T> fmt::Debug for Slot<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(if self.is_set() { "Some(<callback>)" } else { "None" })
  }
}

/// FIFO of pending events plus the callbacks that consume them
#[derive(Debug)]
pub(crate) struct Relay {
  tx: Sender<Event>,
  rx: Receiver<Event>,
  on_response: Slot<ResponseEvent>,
  on_created: Slot<Resource>,
  /// Threads currently running callbacks
  running: Mutex<Vec<ThreadId>>,
}

impl Default for Relay {
  fn default() -> Self {
    let (tx, rx) = crossbeam_channel::unbounded();
    Self { tx,
           rx,
           on_response: Slot::default(),
           on_created: Slot::default(),
           running: Mutex::new(vec![]) }
  }
}

/// Marks the current thread as running callbacks until dropped
struct Running<'a>(&'a Mutex<Vec<ThreadId>>);

impl<'a> Running<'a> {
  /// `None` if this thread is already running callbacks
  fn enter(running: &'a Mutex<Vec<ThreadId>>) -> Option<Self> {
    let me = thread::current().id();
    let mut threads = running.lock();
    if threads.contains(&me) {
      None
    } else {
      threads.push(me);
      Some(Self(running))
    }
  }
}

impl<'a> Drop for Running<'a> {
  fn drop(&mut self) {
    let me = thread::current().id();
    self.0.lock().retain(|t| *t != me);
  }
}

impl Relay {
  pub(crate) fn on_response(&self, f: Option<Box<dyn FnMut(ResponseEvent) + Send>>) {
    self.on_response.set(f)
  }

  pub(crate) fn on_resource_created(&self, f: Option<Box<dyn FnMut(Resource) + Send>>) {
    self.on_created.set(f)
  }

  /// Queue an event, if anyone is listening for it
  pub(crate) fn push(&self, event: Event) {
    let listening = match &event {
      | Event::Response(_) => self.on_response.is_set(),
      | Event::ResourceCreated(_) => self.on_created.is_set(),
    };

    if listening {
      // we hold `rx`, so the channel can't be disconnected
      self.tx.send(event).ok();
    }
  }

  fn run(&self, event: Event) {
    match event {
      | Event::Response(r) => self.on_response.call(r),
      | Event::ResourceCreated(r) => self.on_created.call(r),
    }
  }

  fn reentered(&self) -> usize {
    log::warn!(target: "croak",
               "events polled from inside an event callback; {} left queued",
               self.rx.len());
    0
  }

  /// Run every queued event, returning how many ran
  pub(crate) fn drain(&self) -> usize {
    match Running::enter(&self.running) {
      | Some(_running) => self.run_queued(),
      | None => self.reentered(),
    }
  }

  fn run_queued(&self) -> usize {
    let mut n = 0;
    while let Ok(event) = self.rx.try_recv() {
      self.run(event);
      n += 1;
    }
    n
  }

  /// Wait up to `timeout` for an event, then run everything queued
  pub(crate) fn wait(&self, timeout: Duration) -> usize {
    let _running = match Running::enter(&self.running) {
      | Some(running) => running,
      | None => return self.reentered(),
    };

    match self.rx.recv_timeout(timeout) {
      | Ok(event) => {
        self.run(event);
        1 + self.run_queued()
      },
      | Err(_) => 0,
    }
  }

  #[cfg(test)]
  pub(crate) fn pending(&self) -> usize {
    self.rx.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(n: u16) -> ResponseEvent {
    ResponseEvent { code: Code::new(2, 5),
                    id: Id(n),
                    ty: Type::Ack,
                    token: Token(Default::default()),
                    payload: n.to_string().into_bytes(),
                    from: "127.0.0.1:5683".parse().unwrap() }
  }

  #[test]
  fn dropped_without_callback() {
    let relay = Relay::default();
    relay.push(Event::Response(response(1)));
    assert_eq!(relay.pending(), 0);
    assert_eq!(relay.drain(), 0);
  }

  #[test]
  fn runs_in_order() {
    let relay = Relay::default();
    let seen = Arc::new(Mutex::new(vec![]));
    let seen2 = seen.clone();
    relay.on_response(Some(Box::new(move |r: ResponseEvent| seen2.lock().push(r.id.0))));

    (1..=3).for_each(|n| relay.push(Event::Response(response(n))));
    assert_eq!(relay.pending(), 3);
    assert_eq!(relay.drain(), 3);
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
  }

  #[test]
  fn replacing_callback() {
    let relay = Relay::default();
    let hits = Arc::new(Mutex::new((0, 0)));

    let h = hits.clone();
    relay.on_response(Some(Box::new(move |_: ResponseEvent| h.lock().0 += 1)));
    relay.push(Event::Response(response(1)));

    let h = hits.clone();
    relay.on_response(Some(Box::new(move |_: ResponseEvent| h.lock().1 += 1)));
    relay.push(Event::Response(response(2)));

    relay.drain();
    assert_eq!(*hits.lock(), (0, 2));
  }

  #[test]
  fn wait_times_out() {
    let relay = Relay::default();
    assert_eq!(relay.wait(Duration::from_millis(10)), 0);
  }

  #[test]
  fn wait_wakes_on_push() {
    let relay = Arc::new(Relay::default());
    relay.on_response(Some(Box::new(|_: ResponseEvent| ())));

    let r = relay.clone();
    let t = std::thread::spawn(move || r.wait(Duration::from_secs(5)));
    std::thread::sleep(Duration::from_millis(20));
    relay.push(Event::Response(response(7)));

    assert_eq!(t.join().unwrap(), 1);
  }

  #[test]
  fn polling_from_a_callback_does_not_block() {
    let relay = Arc::new(Relay::default());
    let nested = Arc::new(Mutex::new(vec![]));

    let (r, n) = (Arc::downgrade(&relay), nested.clone());
    relay.on_response(Some(Box::new(move |_: ResponseEvent| {
                        if let Some(r) = r.upgrade() {
                          n.lock().push((r.drain(), r.wait(Duration::from_secs(5))));
                        }
                      })));

    relay.push(Event::Response(response(1)));
    relay.push(Event::Response(response(2)));

    assert_eq!(relay.drain(), 2);
    assert_eq!(*nested.lock(), vec![(0, 0), (0, 0)]);

    // and a later poll still runs callbacks
    relay.push(Event::Response(response(3)));
    assert_eq!(relay.wait(Duration::from_secs(1)), 1);
    assert_eq!(nested.lock().len(), 3);
  }

  #[test]
  fn payload_helpers() {
    let r = response(42);
    assert_eq!(r.payload_str(), Some("42"));

    #[cfg(feature = "std_serde_json")]
    assert_eq!(r.json::<u32>().unwrap(), 42);
  }
}
