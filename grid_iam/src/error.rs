use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Specific authentication failure kinds to provide more granular control.
///
/// Every variant means "credentials were presented but rejected"; the absence
/// of credentials is expressed as `Ok(None)` from an authenticator and never
/// reaches this type. The handler layer collapses all of these into a single
/// unauthenticated response so the sub-reason does not leak to clients.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFailure {
  /// Credential did not match any stored record
  #[error("invalid credential")]
  InvalidCredential,

  /// Session exists but its expiry has passed
  #[error("session expired")]
  SessionExpired,

  /// Session exists but was revoked
  #[error("session revoked")]
  SessionRevoked,

  /// Session record is missing required linkage (no user id)
  #[error("malformed session")]
  MalformedSession,

  /// The backing user or service account is disabled
  #[error("principal disabled")]
  PrincipalDisabled,

  /// Bearer token failed signature, audience, issuer or expiry checks
  #[error("invalid token: {0}")]
  InvalidToken(String),

  /// Bearer token verified but lacks required claims
  #[error("malformed token: {0}")]
  MalformedToken(String),

  /// Bearer token jti is present in the revocation store
  #[error("token revoked")]
  TokenRevoked,

  /// Machine identity has no backing service account record
  #[error("unknown service account: {0}")]
  UnknownServiceAccount(String),
}

/// Core IAM error types
///
/// These errors represent domain outcomes, not technical implementation
/// details. Store and enforcer faults carry the underlying cause as text.
#[derive(Error, Debug, Clone)]
pub enum IamError {
  /// Credentials were presented and rejected
  #[error("unauthenticated: {0}")]
  Unauthenticated(AuthFailure),

  /// Principal, role or session does not exist
  #[error("not found: {0}")]
  NotFound(String),

  /// The role assignment or binding already exists
  #[error("already assigned: {0}")]
  AlreadyAssigned(String),

  /// Optimistic concurrency check failed on a role update
  #[error("version mismatch: expected {expected}, current {current}")]
  VersionMismatch { expected: i32, current: i32 },

  /// Role deletion refused while principals still hold it
  #[error("role in use: {0}")]
  RoleInUse(String),

  /// Caller-supplied arguments failed validation
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// Unique constraint violation surfaced by the store
  #[error("resource already exists: {0}")]
  UniqueViolation(String),

  /// Policy engine operational fault
  #[error("enforcer error: {0}")]
  Enforcer(String),

  /// Store operational fault (transport, query, serialization)
  #[error("store error: {0}")]
  Store(String),

  /// Cold-start failure; the process must not serve requests
  #[error("initialization error: {0}")]
  Init(String),

  /// Internal/unexpected errors
  #[error("internal error: {0}")]
  Internal(String),
}

impl IamError {
  pub fn unauthenticated(failure: AuthFailure) -> Self {
    IamError::Unauthenticated(failure)
  }

  /// True when the error should be rendered as a single opaque
  /// "unauthenticated" outcome by the handler layer.
  pub fn is_authentication_failure(&self) -> bool {
    matches!(self, IamError::Unauthenticated(_))
  }

  /// True for the admin-path conflicts that map to 409-equivalents.
  pub fn is_conflict(&self) -> bool {
    matches!(
      self,
      IamError::AlreadyAssigned(_)
        | IamError::VersionMismatch { .. }
        | IamError::RoleInUse(_)
        | IamError::UniqueViolation(_)
    )
  }
}

impl From<AuthFailure> for IamError {
  fn from(failure: AuthFailure) -> Self {
    IamError::Unauthenticated(failure)
  }
}

impl From<anyhow::Error> for IamError {
  fn from(err: anyhow::Error) -> Self {
    IamError::Internal(err.to_string())
  }
}

impl From<serde_yaml::Error> for IamError {
  fn from(err: serde_yaml::Error) -> Self {
    IamError::InvalidRequest(format!("configuration parse error: {}", err))
  }
}
