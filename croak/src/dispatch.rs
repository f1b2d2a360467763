//! Request handlers for resources, and the route table that
//! picks one for every incoming request.
//!
//! Handlers run with the endpoint's state lock held and may take
//! the route table lock (to create or forget a route); the engine
//! never holds the route table lock while a handler runs.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::option::{self, known};
use crate::req::{Method, Methods};
use crate::resource::{Entry, NewResource, ResourceId, ResourceTable, Value};
use crate::resp::code::{BAD_REQUEST,
                        CHANGED,
                        CONTENT,
                        CREATED,
                        DELETED,
                        INTERNAL_SERVER_ERROR,
                        NOT_ACCEPTABLE,
                        PRECONDITION_FAILED,
                        VALID};
use crate::resp::Reply;
use crate::{ContentFormat, Message};

/// What a handler did
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outcome {
  pub(crate) reply: Reply,
  /// A resource created by this request
  pub(crate) created: Option<ResourceId>,
}

impl From<Reply> for Outcome {
  fn from(reply: Reply) -> Self {
    Outcome { reply,
              created: None }
  }
}

/// A request handler
pub(crate) type Handler = fn(&mut ResourceTable, &Mutex<Routes>, &Message) -> Outcome;

/// The handler serving each method on one path, indexed by [`Method::index`]
#[derive(Clone, Copy, Default)]
pub(crate) struct MethodTable([Option<Handler>; 4]);

impl MethodTable {
  /// A table serving every method with the resource handlers
  pub(crate) fn all() -> Self {
    let mut table = Self::default();
    table.set(Methods::ALL, true);
    table
  }

  pub(crate) fn set(&mut self, methods: Methods, enabled: bool) {
    methods.iter()
           .for_each(|m| self.0[m.index()] = enabled.then_some(handler_for(m)));
  }

  pub(crate) fn get(&self, method: Method) -> Option<Handler> {
    self.0[method.index()]
  }

  pub(crate) fn enabled(&self) -> Methods {
    Method::ALL.into_iter()
               .filter(|m| self.0[m.index()].is_some())
               .fold(Methods::NONE, |set, m| set | m)
  }
}

impl fmt::Debug for MethodTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.enabled().iter()).finish()
  }
}

fn handler_for(method: Method) -> Handler {
  match method {
    | Method::Get => get,
    | Method::Put => put,
    | Method::Post => post,
    | Method::Delete => delete,
  }
}

/// Outcome of looking up a request in the [`Routes`]
pub(crate) enum Route {
  Found(Handler),
  NotFound,
  MethodNotAllowed,
}

/// Path → handler table, plus an optional handler for PUTs to unknown paths
#[derive(Default)]
pub(crate) struct Routes {
  paths: HashMap<String, MethodTable>,
  unknown_put: Option<Handler>,
}

impl fmt::Debug for Routes {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Routes")
     .field("paths", &self.paths)
     .field("unknown_put", &self.unknown_put.is_some())
     .finish()
  }
}

impl Routes {
  /// Serve every method on `uri`
  pub(crate) fn add(&mut self, uri: &str) {
    self.paths.insert(uri.to_string(), MethodTable::all());
  }

  pub(crate) fn remove(&mut self, uri: &str) {
    self.paths.remove(uri);
  }

  pub(crate) fn set(&mut self, uri: &str, methods: Methods, enabled: bool) {
    if let Some(table) = self.paths.get_mut(uri) {
      table.set(methods, enabled);
    }
  }

  pub(crate) fn enabled(&self, uri: &str) -> Methods {
    self.paths
        .get(uri)
        .map(MethodTable::enabled)
        .unwrap_or_default()
  }

  /// Create resources for PUTs to paths with no route
  pub(crate) fn create_on_put(&mut self, on: bool) {
    self.unknown_put = on.then_some(put as Handler);
  }

  pub(crate) fn route(&self, path: Option<&str>, method: Method) -> Route {
    match path.and_then(|p| self.paths.get(p)) {
      | Some(table) => table.get(method)
                            .map(Route::Found)
                            .unwrap_or(Route::MethodNotAllowed),
      | None => match (method, self.unknown_put) {
        | (Method::Put, Some(h)) => Route::Found(h),
        | _ => Route::NotFound,
      },
    }
  }
}

fn find<'a>(resources: &'a mut ResourceTable, req: &Message) -> Option<&'a mut Entry> {
  let id = option::path(req).and_then(|p| resources.find(&p))?;
  resources.get_mut(id)
}

fn content_format(req: &Message) -> Option<ContentFormat> {
  option::uint(req, known::CONTENT_FORMAT).map(|n| ContentFormat::from(n as u16))
}

fn body(req: &Message) -> Option<Vec<u8>> {
  Some(req.payload.0.clone()).filter(|b| !b.is_empty())
}

/// Serve a resource's value
pub(crate) fn get(resources: &mut ResourceTable, _: &Mutex<Routes>, req: &Message) -> Outcome {
  let entry = match find(resources, req) {
    | Some(entry) => entry,
    | None => return Reply::phrase(DELETED).into(),
  };

  if let Some(cf) = entry.media_type {
    if option::has(req, known::ACCEPT)
       && option::uint(req, known::ACCEPT) != Some(u16::from(cf) as u32)
    {
      return Reply::phrase(NOT_ACCEPTABLE).into();
    }
  }

  let valid = entry.etag && option::uint(req, known::ETAG) == Some(entry.etag_value as u32);

  let mut reply = Reply::new(if valid { VALID } else { CONTENT });
  reply.describe(entry);
  if !valid {
    reply.payload = entry.value.clone();
  }

  reply.into()
}

/// Replace a resource's value, or create the resource if the path is unknown
pub(crate) fn put(resources: &mut ResourceTable, routes: &Mutex<Routes>, req: &Message) -> Outcome {
  let content_format = content_format(req);

  match find(resources, req) {
    | Some(entry) => {
      let blocked = option::has(req, known::IF_NONE_MATCH)
                    || (entry.etag
                        && option::uint(req, known::IF_MATCH).unwrap_or(0)
                           != entry.etag_value as u32);
      if blocked {
        return Reply::phrase(PRECONDITION_FAILED).into();
      }

      match body(req) {
        | Some(body) => {
          entry.update_value(&Value::Bytes(body));
          entry.media_type = content_format;

          let mut reply = Reply::new(CHANGED);
          reply.etag(entry);
          reply.into()
        },
        | None => Reply::phrase(INTERNAL_SERVER_ERROR).into(),
      }
    },
    | None => {
      let uri = match option::path(req).filter(|p| !p.is_empty()) {
        | Some(uri) => uri,
        | None => return Reply::phrase(BAD_REQUEST).into(),
      };

      let new = NewResource { uri: uri.clone(),
                              media_type: content_format,
                              max_age: None,
                              value: body(req).map(Value::Bytes).unwrap_or_default(),
                              etag: false };

      match resources.insert(Entry::new(new)) {
        | Ok(id) => {
          routes.lock().add(&uri);
          log::debug!(target: "croak", "created resource {:?}", uri);
          Outcome { reply: Reply::phrase(CREATED),
                    created: Some(id) }
        },
        | Err(e) => {
          log::warn!(target: "croak", "cannot create resource {:?}: {}", uri, e);
          Reply::phrase(INTERNAL_SERVER_ERROR).into()
        },
      }
    },
  }
}

/// Replace an existing resource's value
pub(crate) fn post(resources: &mut ResourceTable, _: &Mutex<Routes>, req: &Message) -> Outcome {
  let entry = match find(resources, req) {
    | Some(entry) => entry,
    | None => return Reply::phrase(DELETED).into(),
  };

  match body(req) {
    | Some(body) => {
      entry.media_type = content_format(req);
      entry.update_value(&Value::Bytes(body));

      let mut reply = Reply::new(CHANGED);
      reply.etag(entry);
      reply.into()
    },
    // media type stays as it was when there is no body
    | None => Reply::phrase(INTERNAL_SERVER_ERROR).into(),
  }
}

/// Remove a resource
pub(crate) fn delete(resources: &mut ResourceTable, routes: &Mutex<Routes>, req: &Message) -> Outcome {
  if let Some(uri) = option::path(req) {
    if resources.remove(&uri).is_some() {
      routes.lock().remove(&uri);
      log::debug!(target: "croak", "deleted resource {:?}", uri);
    }
  }

  Reply::new(DELETED).into()
}

#[cfg(test)]
mod tests {
  use toad_msg::{Code, Id, Payload, Token, Type};

  use super::*;
  use crate::option::encode_uint;
  use crate::resp::code;

  fn req(method: Method, path: &str) -> Message {
    let mut msg = Message { ty: Type::Con,
                            ver: Default::default(),
                            code: method.code(),
                            id: Id(1),
                            opts: Default::default(),
                            payload: Payload(vec![]),
                            token: Token(Default::default()) };
    path.split('/')
        .filter(|s| !s.is_empty())
        .for_each(|s| option::add(&mut msg, known::URI_PATH, s.as_bytes().to_vec()));
    msg
  }

  fn with_body(mut msg: Message, body: &str) -> Message {
    msg.payload = Payload(body.as_bytes().to_vec());
    msg
  }

  fn with_opt(mut msg: Message, num: toad_msg::OptNumber, val: Vec<u8>) -> Message {
    option::set(&mut msg, num, val);
    msg
  }

  fn table(res: NewResource) -> (ResourceTable, Mutex<Routes>, ResourceId) {
    let mut t = ResourceTable::default();
    let routes = Mutex::new(Routes::default());
    routes.lock().add(&res.uri);
    let id = t.insert(Entry::new(res)).unwrap();
    (t, routes, id)
  }

  fn assert_phrase(out: &Outcome, code: Code) {
    assert_eq!(out.reply.code, code);
    assert_eq!(out.reply.payload,
               code::phrase(code).unwrap().as_bytes().to_vec());
  }

  #[test]
  fn get_content() {
    let (mut t, r, _) = table(NewResource::new("temp").value("20")
                                                      .media_type(ContentFormat::Text)
                                                      .max_age(30));
    let out = get(&mut t, &r, &req(Method::Get, "temp"));

    assert_eq!(out.reply.code, CONTENT);
    assert_eq!(out.reply.payload, b"20".to_vec());
    assert_eq!(out.reply.get(known::CONTENT_FORMAT), Some(&[][..]));
    assert_eq!(out.reply.get(known::MAX_AGE), Some(&[30][..]));
    assert_eq!(out.reply.get(known::ETAG), None);
  }

  #[test]
  fn get_missing_resource() {
    let mut t = ResourceTable::default();
    let r = Mutex::new(Routes::default());
    assert_phrase(&get(&mut t, &r, &req(Method::Get, "nope")), DELETED);
  }

  #[test]
  fn get_accept_mismatch() {
    let (mut t, r, _) = table(NewResource::new("j").media_type(ContentFormat::Json));

    // empty Accept means text/plain
    let out = get(&mut t, &r, &with_opt(req(Method::Get, "j"), known::ACCEPT, vec![]));
    assert_phrase(&out, NOT_ACCEPTABLE);

    let out = get(&mut t, &r, &with_opt(req(Method::Get, "j"), known::ACCEPT, vec![50]));
    assert_eq!(out.reply.code, CONTENT);
  }

  #[test]
  fn get_accept_ignored_without_media_type() {
    let (mut t, r, _) = table(NewResource::new("x"));
    let out = get(&mut t, &r, &with_opt(req(Method::Get, "x"), known::ACCEPT, vec![50]));
    assert_eq!(out.reply.code, CONTENT);
    assert_eq!(out.reply.payload, vec![0]);
  }

  #[test]
  fn get_valid_when_etag_matches() {
    let (mut t, r, _) = table(NewResource::new("e").value("v").etag(true));

    let out = get(&mut t, &r, &with_opt(req(Method::Get, "e"), known::ETAG, vec![1]));
    assert_eq!(out.reply.code, VALID);
    assert!(out.reply.payload.is_empty());
    assert_eq!(out.reply.get(known::ETAG), Some(&[1][..]));

    let out = get(&mut t, &r, &with_opt(req(Method::Get, "e"), known::ETAG, vec![2]));
    assert_eq!(out.reply.code, CONTENT);
    assert_eq!(out.reply.payload, b"v".to_vec());
  }

  #[test]
  fn put_changes_value_and_media_type() {
    let (mut t, r, id) = table(NewResource::new("temp").value("20")
                                                       .media_type(ContentFormat::Json));
    let msg = with_body(req(Method::Put, "temp"), "21");
    let out = put(&mut t, &r, &msg);

    assert_eq!(out.reply.code, CHANGED);
    assert!(out.reply.payload.is_empty());
    let e = t.get(id).unwrap();
    assert_eq!(e.value, b"21".to_vec());
    assert_eq!(e.media_type, None);
  }

  #[test]
  fn put_without_body_is_server_error() {
    let (mut t, r, id) = table(NewResource::new("temp").value("20"));
    assert_phrase(&put(&mut t, &r, &req(Method::Put, "temp")), INTERNAL_SERVER_ERROR);
    assert_eq!(t.get(id).unwrap().value, b"20".to_vec());
  }

  #[test]
  fn put_if_none_match_blocks() {
    let (mut t, r, id) = table(NewResource::new("temp").value("20")
                                                       .media_type(ContentFormat::Text));
    let msg = with_opt(with_body(req(Method::Put, "temp"), "1"), known::IF_NONE_MATCH, vec![]);
    assert_phrase(&put(&mut t, &r, &msg), PRECONDITION_FAILED);

    let e = t.get(id).unwrap();
    assert_eq!(e.value, b"20".to_vec());
    assert_eq!(e.media_type, Some(ContentFormat::Text));
  }

  #[test]
  fn put_if_match_against_etag() {
    let (mut t, r, id) = table(NewResource::new("e").etag(true));

    let missing = with_body(req(Method::Put, "e"), "a");
    assert_phrase(&put(&mut t, &r, &missing), PRECONDITION_FAILED);

    let stale = with_opt(with_body(req(Method::Put, "e"), "a"), known::IF_MATCH, vec![9]);
    assert_phrase(&put(&mut t, &r, &stale), PRECONDITION_FAILED);

    let fresh = with_opt(with_body(req(Method::Put, "e"), "a"), known::IF_MATCH, vec![1]);
    let out = put(&mut t, &r, &fresh);
    assert_eq!(out.reply.code, CHANGED);
    assert_eq!(out.reply.get(known::ETAG), Some(&[2][..]));
    assert_eq!(t.get(id).unwrap().etag_value, 2);
  }

  #[test]
  fn put_creates_unknown_resource() {
    let mut t = ResourceTable::default();
    let r = Mutex::new(Routes::default());
    let msg = with_opt(with_body(req(Method::Put, "new/thing"), "hi"),
                       known::CONTENT_FORMAT,
                       encode_uint(50));
    let out = put(&mut t, &r, &msg);

    assert_phrase(&out, CREATED);
    let id = out.created.unwrap();
    let e = t.get(id).unwrap();
    assert_eq!(e.uri, "new/thing");
    assert_eq!(e.value, b"hi".to_vec());
    assert_eq!(e.media_type, Some(ContentFormat::Json));
    assert!(!e.etag);
    assert!(matches!(r.lock().route(Some("new/thing"), Method::Get), Route::Found(_)));
  }

  #[test]
  fn put_creates_with_default_value() {
    let mut t = ResourceTable::default();
    let r = Mutex::new(Routes::default());
    let out = put(&mut t, &r, &req(Method::Put, "empty"));
    assert_eq!(t.get(out.created.unwrap()).unwrap().value, vec![0]);
  }

  #[test]
  fn put_without_path_is_bad_request() {
    let mut t = ResourceTable::default();
    let r = Mutex::new(Routes::default());
    assert_phrase(&put(&mut t, &r, &with_body(req(Method::Put, ""), "x")), BAD_REQUEST);
    assert_eq!(t.len(), 0);
  }

  #[test]
  fn post_requires_existing_resource_and_body() {
    let mut t = ResourceTable::default();
    let r = Mutex::new(Routes::default());
    assert_phrase(&post(&mut t, &r, &with_body(req(Method::Post, "x"), "1")), DELETED);

    let (mut t, r, id) = table(NewResource::new("x").media_type(ContentFormat::Json)
                                                    .etag(true));
    assert_phrase(&post(&mut t, &r, &req(Method::Post, "x")), INTERNAL_SERVER_ERROR);
    assert_eq!(t.get(id).unwrap().media_type, Some(ContentFormat::Json));

    let msg = with_opt(with_body(req(Method::Post, "x"), "1"), known::CONTENT_FORMAT, vec![]);
    let out = post(&mut t, &r, &msg);
    assert_eq!(out.reply.code, CHANGED);
    assert_eq!(out.reply.get(known::ETAG), Some(&[2][..]));
    assert_eq!(t.get(id).unwrap().media_type, Some(ContentFormat::Text));
  }

  #[test]
  fn delete_is_idempotent() {
    let (mut t, r, _) = table(NewResource::new("x"));

    let out = delete(&mut t, &r, &req(Method::Delete, "x"));
    assert_eq!(out.reply, Reply::new(DELETED));
    assert!(t.find("x").is_none());
    assert!(matches!(r.lock().route(Some("x"), Method::Get), Route::NotFound));

    let out = delete(&mut t, &r, &req(Method::Delete, "x"));
    assert_eq!(out.reply, Reply::new(DELETED));
  }

  #[test]
  fn routing() {
    let mut routes = Routes::default();
    routes.add("a");
    routes.set("a", Methods::from(Method::Delete), false);

    assert!(matches!(routes.route(Some("a"), Method::Get), Route::Found(_)));
    assert!(matches!(routes.route(Some("a"), Method::Delete), Route::MethodNotAllowed));
    assert!(matches!(routes.route(Some("b"), Method::Put), Route::NotFound));
    assert!(matches!(routes.route(None, Method::Get), Route::NotFound));
    assert_eq!(routes.enabled("a"), Methods::from(Method::Get) | Method::Put | Method::Post);

    routes.create_on_put(true);
    assert!(matches!(routes.route(Some("b"), Method::Put), Route::Found(_)));
    assert!(matches!(routes.route(Some("b"), Method::Get), Route::NotFound));
  }
}
