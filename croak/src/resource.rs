use std::sync::Weak;

use indexmap::IndexMap;

use crate::endpoint::Shared;
use crate::error::{Error, Result};
use crate::req::Methods;
use crate::ContentFormat;

/// The value of a resource, as handed to the endpoint.
///
/// Integers are stored in a compact little-endian form (see
/// [`Value::to_bytes`]); byte strings are stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
  /// An integer
  Int(i64),
  /// Raw bytes
  Bytes(Vec<u8>),
}

impl Value {
  /// Get the stored representation of this value.
  ///
  /// Integers are truncated to 32 bits; values up to `0xFF`
  /// take one byte and anything larger takes the two least
  /// significant bytes, little-endian.
  ///
  /// ```
  /// use croak::Value;
  ///
  /// assert_eq!(Value::Int(20).to_bytes(), vec![20]);
  /// assert_eq!(Value::Int(0x1234).to_bytes(), vec![0x34, 0x12]);
  /// assert_eq!(Value::from("20").to_bytes(), b"20".to_vec());
  /// ```
  pub fn to_bytes(&self) -> Vec<u8> {
    match self {
      | Value::Int(n) => {
        let n = *n as u32;
        if n > 0xFF {
          (n as u16).to_le_bytes().to_vec()
        } else {
          vec![n as u8]
        }
      },
      | Value::Bytes(b) => b.clone(),
    }
  }

  /// Serialize `t` as JSON
  #[cfg(feature = "std_serde_json")]
  pub fn json<T: serde::Serialize>(t: &T) -> serde_json::Result<Value> {
    serde_json::to_vec(t).map(Value::Bytes)
  }
}

impl Default for Value {
  fn default() -> Self {
    Value::Int(0)
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Int(n)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Int(n as i64)
  }
}

impl From<u32> for Value {
  fn from(n: u32) -> Self {
    Value::Int(n as i64)
  }
}

impl From<Vec<u8>> for Value {
  fn from(b: Vec<u8>) -> Self {
    Value::Bytes(b)
  }
}

impl From<&[u8]> for Value {
  fn from(b: &[u8]) -> Self {
    Value::Bytes(b.to_vec())
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Bytes(s.as_bytes().to_vec())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Bytes(s.into_bytes())
  }
}

/// Everything needed to add a resource
///
/// ```
/// use croak::{ContentFormat, NewResource};
///
/// let temp = NewResource::new("temp").media_type(ContentFormat::Text)
///                                    .max_age(60)
///                                    .value("20")
///                                    .etag(true);
/// assert_eq!(temp.uri, "temp");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
  /// The resource key, matched exactly against the
  /// `/`-joined Uri-Path of incoming requests
  pub uri: String,
  /// Media type; when set, GET requests with a different Accept are refused
  pub media_type: Option<ContentFormat>,
  /// Max-Age, in seconds
  pub max_age: Option<u32>,
  /// Initial value; defaults to `Value::Int(0)`
  pub value: Value,
  /// Version the resource with an ETag
  pub etag: bool,
}

impl NewResource {
  /// A resource with no media type, no max-age, no ETag and the value `0`
  pub fn new(uri: impl Into<String>) -> Self {
    Self { uri: uri.into(),
           media_type: None,
           max_age: None,
           value: Value::default(),
           etag: false }
  }

  /// Set the media type
  pub fn media_type(mut self, media_type: ContentFormat) -> Self {
    self.media_type = Some(media_type);
    self
  }

  /// Set the max age
  pub fn max_age(mut self, seconds: u32) -> Self {
    self.max_age = Some(seconds);
    self
  }

  /// Set the initial value
  pub fn value(mut self, value: impl Into<Value>) -> Self {
    self.value = value.into();
    self
  }

  /// Enable or disable ETag versioning
  pub fn etag(mut self, etag: bool) -> Self {
    self.etag = etag;
    self
  }
}

/// A snapshot of a resource's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDetails {
  /// Resource key
  pub uri: String,
  /// Media type
  pub media_type: Option<ContentFormat>,
  /// Max-Age, in seconds
  pub max_age: Option<u32>,
  /// Whether ETag versioning is on
  pub etag: bool,
  /// Current ETag (zero while versioning is off)
  pub etag_value: u16,
}

/// A partial update of a resource's metadata; unset fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetDetails {
  media_type: Option<Option<ContentFormat>>,
  max_age: Option<Option<u32>>,
  etag: Option<bool>,
}

impl SetDetails {
  /// Set (or clear, with `None`) the media type
  pub fn media_type(mut self, media_type: Option<ContentFormat>) -> Self {
    self.media_type = Some(media_type);
    self
  }

  /// Set (or clear, with `None`) the max age
  pub fn max_age(mut self, max_age: Option<u32>) -> Self {
    self.max_age = Some(max_age);
    self
  }

  /// Turn ETag versioning on or off.
  ///
  /// This restarts the ETag at 1 (on) or 0 (off).
  pub fn etag(mut self, etag: bool) -> Self {
    self.etag = Some(etag);
    self
  }
}

/// A resource as stored in the [`ResourceTable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
  pub(crate) uri: String,
  pub(crate) media_type: Option<ContentFormat>,
  pub(crate) max_age: Option<u32>,
  pub(crate) etag: bool,
  pub(crate) etag_value: u16,
  pub(crate) value: Vec<u8>,
  pub(crate) attributes: Vec<(String, String)>,
}

impl Entry {
  pub(crate) fn new(new: NewResource) -> Self {
    let mut entry = Entry { uri: new.uri,
                            media_type: new.media_type,
                            max_age: new.max_age,
                            etag: new.etag,
                            etag_value: 0,
                            value: vec![],
                            attributes: vec![] };
    entry.update_value(&new.value);
    entry
  }

  /// Replace the value, moving the ETag forward when versioning is on.
  ///
  /// The ETag never takes the value zero.
  pub(crate) fn update_value(&mut self, value: &Value) {
    if self.etag {
      self.etag_value = match self.etag_value.wrapping_add(1) {
        | 0 => 1,
        | n => n,
      };
    }

    self.value = value.to_bytes();
  }

  pub(crate) fn details(&self) -> ResourceDetails {
    ResourceDetails { uri: self.uri.clone(),
                      media_type: self.media_type,
                      max_age: self.max_age,
                      etag: self.etag,
                      etag_value: self.etag_value }
  }

  pub(crate) fn set_details(&mut self, set: &SetDetails) {
    if let Some(media_type) = set.media_type {
      self.media_type = media_type;
    }

    if let Some(max_age) = set.max_age {
      self.max_age = max_age;
    }

    if let Some(etag) = set.etag {
      self.etag = etag;
      self.etag_value = if etag { 1 } else { 0 };
    }
  }
}

/// Stable reference to a slot in a [`ResourceTable`].
///
/// Slots are reused after removal; the generation tells
/// a stale id apart from the slot's new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ResourceId {
  slot: usize,
  generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
  generation: u32,
  entry: Option<Entry>,
}

/// Append-ordered collection of resources with unique uris
#[derive(Debug, Default)]
pub(crate) struct ResourceTable {
  slots: Vec<Slot>,
  free: Vec<usize>,
  by_uri: IndexMap<String, ResourceId>,
}

impl ResourceTable {
  pub(crate) fn insert(&mut self, entry: Entry) -> Result<ResourceId> {
    if self.by_uri.contains_key(&entry.uri) {
      return Err(Error::DuplicateResource(entry.uri));
    }

    let slot = match self.free.pop() {
      | Some(slot) => slot,
      | None => {
        self.slots.push(Slot::default());
        self.slots.len() - 1
      },
    };

    let id = ResourceId { slot,
                          generation: self.slots[slot].generation };
    self.by_uri.insert(entry.uri.clone(), id);
    self.slots[slot].entry = Some(entry);

    Ok(id)
  }

  pub(crate) fn find(&self, uri: &str) -> Option<ResourceId> {
    self.by_uri.get(uri).copied()
  }

  pub(crate) fn get(&self, id: ResourceId) -> Option<&Entry> {
    self.slots
        .get(id.slot)
        .filter(|s| s.generation == id.generation)
        .and_then(|s| s.entry.as_ref())
  }

  pub(crate) fn get_mut(&mut self, id: ResourceId) -> Option<&mut Entry> {
    self.slots
        .get_mut(id.slot)
        .filter(|s| s.generation == id.generation)
        .and_then(|s| s.entry.as_mut())
  }

  /// Detach the resource at `uri`, keeping the order of the rest
  pub(crate) fn remove(&mut self, uri: &str) -> Option<Entry> {
    let id = self.by_uri.shift_remove(uri)?;
    let slot = &mut self.slots[id.slot];
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.slot);
    slot.entry.take()
  }

  /// Every resource id, in the order resources were added
  pub(crate) fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
    self.by_uri.values().copied()
  }

  pub(crate) fn len(&self) -> usize {
    self.by_uri.len()
  }
}

/// Handle to a resource registered with an [`Endpoint`](crate::Endpoint).
///
/// Handles stay valid for as long as the resource exists; once it
/// is removed (locally or by a DELETE request) every operation
/// fails with [`Error::ResourceGone`].
#[derive(Debug, Clone)]
pub struct Resource {
  pub(crate) id: ResourceId,
  pub(crate) uri: String,
  pub(crate) shared: Weak<Shared>,
}

impl PartialEq for Resource {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id && Weak::ptr_eq(&self.shared, &other.shared)
  }
}

impl Resource {
  /// The resource key this handle was created for
  pub fn uri(&self) -> &str {
    &self.uri
  }

  fn with<R>(&self, f: impl FnOnce(&mut Entry, &Shared) -> R) -> Result<R> {
    let shared = self.shared.upgrade().ok_or(Error::ResourceGone)?;
    let mut state = shared.state.lock();
    let entry = state.resources.get_mut(self.id).ok_or(Error::ResourceGone)?;
    Ok(f(entry, &shared))
  }

  /// Get the current (stored) value
  pub fn value(&self) -> Result<Vec<u8>> {
    self.with(|e, _| e.value.clone())
  }

  /// Replace the value, advancing the ETag if versioning is on
  pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
    let value = value.into();
    self.with(|e, _| e.update_value(&value))
  }

  /// Get the resource's metadata
  pub fn details(&self) -> Result<ResourceDetails> {
    self.with(|e, _| e.details())
  }

  /// Change some of the resource's metadata
  pub fn set_details(&self, set: SetDetails) -> Result<()> {
    self.with(|e, _| e.set_details(&set))
  }

  /// Attach a link-format attribute, e.g. `("rt", "temperature-c")`
  pub fn add_attribute(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
    let attr = (name.into(), value.into());
    self.with(|e, _| e.attributes.push(attr))
  }

  /// All link-format attributes, in the order they were added
  pub fn attributes(&self) -> Result<Vec<(String, String)>> {
    self.with(|e, _| e.attributes.clone())
  }

  /// Register (`enabled = true`) or unregister the handlers
  /// for a set of methods.
  ///
  /// Requests using a method with no handler are answered
  /// with 4.05 Method Not Allowed.
  pub fn enable(&self, methods: Methods, enabled: bool) -> Result<()> {
    self.with(|e, shared| shared.engine.set_handlers(&e.uri, methods, enabled))
  }

  /// The methods that currently have a handler
  pub fn enabled(&self) -> Result<Methods> {
    self.with(|e, shared| shared.engine.handlers(&e.uri))
  }
}
