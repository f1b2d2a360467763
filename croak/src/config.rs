use std::net::{IpAddr, SocketAddr};

use embedded_time::duration::Milliseconds;

use crate::error::{Error, Result};
use crate::platform::Psk;
use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Port for plain CoAP
pub const DEFAULT_PORT: u16 = 5683;

/// Port for CoAP over DTLS
pub const DEFAULT_SECURE_PORT: u16 = 5684;

/// Configuration options related to outbound CON messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Con {
  /// Retry strategy for CON messages that have not yet been ACKed.
  ///
  /// Defaults to an exponential retry strategy starting between
  /// two and three seconds:
  /// ```
  /// use croak::config::Con;
  /// use croak::retry::Strategy;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Con::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000) });
  /// ```
  pub retry_strategy: Strategy,
  /// Number of times a CON message may be transmitted
  /// (the first send plus retransmissions).
  ///
  /// Defaults to 5 attempts.
  /// ```
  /// use croak::config::Con;
  /// use croak::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(5));
  /// ```
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                  init_max: Milliseconds(3_000) },
          max_attempts: Attempts(5) }
  }
}

/// Configuration options related to message exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msg {
  /// Seed for the first message id and for retransmission jitter.
  ///
  /// `None` (the default) seeds from the system clock.
  ///
  /// ```
  /// use croak::config::Msg;
  ///
  /// assert_eq!(Msg::default().seed, None);
  /// ```
  pub seed: Option<u64>,
  /// See [`Con`]
  pub con: Con,
  /// How long a received message id is remembered for
  /// duplicate detection, and how long we wait for the
  /// separate response to a request that was ACKed.
  ///
  /// Defaults to 247 seconds.
  ///
  /// ```
  /// use croak::config::Msg;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Msg::default().exchange_lifetime, Milliseconds(247_000u64));
  /// ```
  pub exchange_lifetime: Millis,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { seed: None,
          con: Con::default(),
          exchange_lifetime: Milliseconds(247_000) }
  }
}

/// Endpoint configuration
///
/// ```
/// use std::net::Ipv4Addr;
///
/// use croak::Config;
///
/// let client_only = Config::client();
/// assert_eq!(client_only.address, None);
///
/// let server = Config::server(Ipv4Addr::UNSPECIFIED.into()).service_discovery(true)
///                                                       .dynamic_resources(true);
/// assert_eq!(server.bind_addr().unwrap().unwrap().port(), 5683);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Address to listen on; `None` runs the endpoint as a client only
  pub address: Option<IpAddr>,
  /// Port to listen on; defaults to [`DEFAULT_PORT`], or
  /// [`DEFAULT_SECURE_PORT`] when a psk is set
  pub port: Option<u16>,
  /// Join the "All CoAP Nodes" multicast group
  pub service_discovery: bool,
  /// Create resources on PUT requests to unknown uris
  pub dynamic_resources: bool,
  /// Pre-shared key securing the listening socket with DTLS
  pub psk: Option<Vec<u8>>,
  /// PSK identity hint, required with (and only with) `psk`
  pub hint: Option<String>,
  /// See [`Msg`]
  pub msg: Msg,
  /// Pause between socket polls while no traffic is arriving.
  ///
  /// Defaults to 5 milliseconds.
  ///
  /// ```
  /// use croak::Config;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Config::client().poll_interval, Milliseconds(5u64));
  /// ```
  pub poll_interval: Millis,
}

impl Default for Config {
  fn default() -> Self {
    Config { address: None,
             port: None,
             service_discovery: false,
             dynamic_resources: false,
             psk: None,
             hint: None,
             msg: Msg::default(),
             poll_interval: Milliseconds(5) }
  }
}

impl Config {
  /// An endpoint that only sends requests
  pub fn client() -> Self {
    Self::default()
  }

  /// An endpoint listening on `address`
  pub fn server(address: IpAddr) -> Self {
    Self { address: Some(address),
           ..Self::default() }
  }

  /// Set the listening port
  pub fn port(mut self, port: u16) -> Self {
    self.port = Some(port);
    self
  }

  /// Toggle [`Config::service_discovery`]
  pub fn service_discovery(mut self, on: bool) -> Self {
    self.service_discovery = on;
    self
  }

  /// Toggle [`Config::dynamic_resources`]
  pub fn dynamic_resources(mut self, on: bool) -> Self {
    self.dynamic_resources = on;
    self
  }

  /// Secure the listening socket with DTLS
  pub fn psk(mut self, key: impl AsRef<[u8]>, hint: impl Into<String>) -> Self {
    self.psk = Some(key.as_ref().to_vec());
    self.hint = Some(hint.into());
    self
  }

  /// Server credentials, when listening with DTLS
  pub(crate) fn server_psk(&self) -> Result<Option<Psk>> {
    match (&self.psk, &self.hint) {
      | (Some(key), Some(hint)) => Ok(Some(Psk { key: key.clone(),
                                                 identity: hint.clone() })),
      | (None, None) => Ok(None),
      | _ => Err(Error::PskHintMismatch),
    }
  }

  /// The address to listen on, if any.
  ///
  /// Fails if `psk` and `hint` are not given together.
  pub fn bind_addr(&self) -> Result<Option<SocketAddr>> {
    let secured = self.server_psk()?.is_some();
    Ok(self.address.map(|ip| {
                     let port = self.port.unwrap_or(if secured {
                                                      DEFAULT_SECURE_PORT
                                                    } else {
                                                      DEFAULT_PORT
                                                    });
                     SocketAddr::new(ip, port)
                   }))
  }
}
