use std::io;
use std::net::IpAddr;

use crate::session::Protocol;

/// Broad category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// Invalid arguments or an endpoint in the wrong lifecycle state
  Config,
  /// The operation collided with (or referred to a missing) table entry
  Conflict,
  /// Socket, DTLS or message encoding failure
  Transport,
}

/// Errors yielded by endpoint, resource and session operations.
///
/// Every operation that returns an `Error` leaves the endpoint
/// exactly as it was before the call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A method flag that is not exactly one of GET, PUT, POST or DELETE
  #[error("invalid method flag {0:#04x}")]
  InvalidMethod(u8),
  /// A content-format code outside of the supported media types
  #[error("unsupported content-format {0}")]
  InvalidContentFormat(i32),
  /// `psk` was given without `hint`, or the other way around
  #[error("psk and hint must be given together")]
  PskHintMismatch,
  /// `psk` was given without `identity`, or the other way around
  #[error("psk and identity must be given together")]
  PskIdentityMismatch,
  /// Secured traffic on the plain CoAP port, or plain traffic on the secured port
  #[error("port {port} does not match transport security (psk given: {secured})")]
  PortSecurityMismatch {
    /// the offending port
    port: u16,
    /// whether a psk was supplied
    secured: bool,
  },
  /// The process-wide endpoint has not been initialized yet
  #[error("coap endpoint is not initialized")]
  NotInitialized,
  /// The process-wide endpoint was already initialized
  #[error("coap endpoint is already initialized")]
  AlreadyInitialized,
  /// A resource with this uri already exists
  #[error("resource {0:?} already exists")]
  DuplicateResource(String),
  /// The resource handle refers to a resource that has since been removed
  #[error("resource has been removed")]
  ResourceGone,
  /// A client session for this (address, port, protocol) already exists
  #[error("client session {0}:{1} ({2:?}) already exists")]
  DuplicateSession(IpAddr, u16, Protocol),
  /// No client session matches the (address, port, protocol) triple
  #[error("client session {0}:{1} ({2:?}) not found")]
  SessionNotFound(IpAddr, u16, Protocol),
  /// The transport refused to open a session
  #[error("failed to create client session: {0}")]
  SessionCreate(#[source] io::Error),
  /// The endpoint socket could not be bound
  #[error("failed to bind endpoint: {0}")]
  Bind(#[source] io::Error),
  /// A request message could not be built
  #[error("cannot create request: {0}")]
  BuildRequest(String),
  /// A request was built but could not be sent
  #[error("sending message failed: {0}")]
  Send(#[source] io::Error),
}

impl Error {
  /// Get the [`ErrorKind`] of this error
  pub fn kind(&self) -> ErrorKind {
    match self {
      | Self::InvalidMethod(_)
      | Self::InvalidContentFormat(_)
      | Self::PskHintMismatch
      | Self::PskIdentityMismatch
      | Self::PortSecurityMismatch { .. }
      | Self::NotInitialized
      | Self::AlreadyInitialized => ErrorKind::Config,
      | Self::DuplicateResource(_)
      | Self::ResourceGone
      | Self::DuplicateSession(..)
      | Self::SessionNotFound(..) => ErrorKind::Conflict,
      | Self::SessionCreate(_) | Self::Bind(_) | Self::BuildRequest(_) | Self::Send(_) => {
        ErrorKind::Transport
      },
    }
  }
}

/// `Result` alias used throughout this crate
pub type Result<T> = core::result::Result<T, Error>;
