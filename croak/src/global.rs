//! One [`Endpoint`] for the whole process, for embedders
//! that can't hold on to one themselves.
//!
//! ```no_run
//! use croak::{global, Config, NewResource};
//!
//! global::init(Config::client()).unwrap();
//! assert!(global::init(Config::client()).is_err());
//!
//! global::get().unwrap()
//!              .add_resource(NewResource::new("temp"))
//!              .unwrap();
//! ```
//!
//! The global endpoint is never dropped; its I/O thread
//! runs until the process exits.

use lazycell::AtomicLazyCell;

use crate::error::{Error, Result};
use crate::{Config, Endpoint};

static ENDPOINT: AtomicLazyCell<Endpoint> = AtomicLazyCell::NONE;

/// Initialize the global endpoint.
///
/// Fails with [`Error::AlreadyInitialized`] on every call after the first successful one.
pub fn init(cfg: Config) -> Result<&'static Endpoint> {
  if ENDPOINT.filled() {
    return Err(Error::AlreadyInitialized);
  }

  // racing initializers: the loser's endpoint is shut down on drop
  ENDPOINT.fill(Endpoint::init(cfg)?)
          .map_err(|_| Error::AlreadyInitialized)?;

  get()
}

/// Get the global endpoint.
///
/// Fails with [`Error::NotInitialized`] before [`init`].
pub fn get() -> Result<&'static Endpoint> {
  ENDPOINT.borrow().ok_or(Error::NotInitialized)
}
