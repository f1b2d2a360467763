//! `croak` is a CoAP endpoint with a resource table, client sessions
//! and a background I/O thread, meant to be embedded in
//! applications that want to talk to constrained devices.
//!
//! ## CoAP
//! CoAP is an application-level network protocol that copies the semantics of HTTP
//! to an environment conducive to **constrained** devices. (weak hardware, small battery capacity, etc.)
//!
//! - GET, POST, PUT, DELETE
//! - Headers (renamed to [Options](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10))
//! - Data format independent (via the [Content-Format](https://datatracker.ietf.org/doc/html/rfc7252#section-12.3) Option)
//! - [Response status codes](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9)
//!
//! ## Serving resources
//! An [`Endpoint`] bound to an address answers GET, PUT, POST and DELETE
//! requests for the resources added to it:
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//!
//! use croak::{Config, ContentFormat, Endpoint, NewResource};
//!
//! let endpoint = Endpoint::init(Config::server(Ipv4Addr::UNSPECIFIED.into())).unwrap();
//! let temp = endpoint.add_resource(NewResource::new("sensors/temp").media_type(ContentFormat::Text)
//!                                                                  .value("20"))
//!                    .unwrap();
//!
//! // ...later
//! temp.set_value("21").unwrap();
//! ```
//!
//! ## Talking to peers
//! Requests go out through [`ClientSession`]s; responses arrive at
//! the callback registered with [`Endpoint::on_response`], on the thread that
//! calls [`Endpoint::poll_events`] or [`Endpoint::wait_events`].
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! use croak::req::Request;
//! use croak::{Config, Endpoint};
//!
//! let endpoint = Endpoint::init(Config::client()).unwrap();
//! endpoint.on_response(|resp| println!("{:?} {:?}", resp.code, resp.payload_str()));
//!
//! let session = endpoint.new_client_session(Ipv4Addr::LOCALHOST.into(), None, None, None)
//!                       .unwrap();
//! session.send_request(&Request::get("sensors/temp")).unwrap();
//!
//! endpoint.wait_events(Duration::from_secs(1));
//! ```

#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(missing_copy_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod logging;

/// customizable retrying of fallible operations
pub mod retry;

/// responses
pub mod resp;

/// requests
pub mod req;

/// platform configuration
pub mod platform;

/// network abstractions
pub mod net;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

/// errors
pub mod error;

/// CoAP options
pub mod option;

/// process-wide endpoint
pub mod global;

#[cfg(feature = "dtls")]
#[cfg_attr(docsrs, doc(cfg(feature = "dtls")))]
mod dtls;

mod dispatch;
mod endpoint;
mod engine;
mod event;
mod parse;
mod resource;
mod session;

pub use config::Config;
pub use endpoint::Endpoint;
pub use error::{Error, ErrorKind, Result};
pub use event::ResponseEvent;
pub use option::ContentFormat;
pub use req::{Method, Methods, Request};
pub use resource::{NewResource, Resource, ResourceDetails, SetDetails, Value};
pub use session::{ClientSession, Protocol};

/// A CoAP message, as sent and received on the wire
pub type Message = toad_msg::alloc::Message;

/// Helper constants and functions for creating multicast addresses
pub mod multicast {
  use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

  /// IPv4 "All CoAP devices" multicast address.
  ///
  /// Servers with service discovery on join this group.
  pub const ALL_COAP_DEVICES_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);

  /// Create a SocketAddr (IP + port) with the [`ALL_COAP_DEVICES_IP`] address
  pub const fn all_coap_devices(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(ALL_COAP_DEVICES_IP, port))
  }
}

macro_rules! code {
  (rfc7252($section:literal) $name:ident = $c:literal * $d:literal) => {
    #[doc = concat!("[RFC7252 Section ",
                    $section,
                    "](https://datatracker.ietf.org/doc/html/rfc7252#section-",
                    $section,
                    ")")]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: toad_msg::Code = toad_msg::Code::new($c, $d);
  };
}

pub(crate) use code;
