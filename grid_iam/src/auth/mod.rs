//! Authentication pipeline
//!
//! Authenticators are tried in registration order; each one owns a single
//! credential kind and reports through a tri-state contract:
//!
//! | Return | Meaning |
//! |---|---|
//! | `Ok(None)` | No credentials of this kind present; try the next one. |
//! | `Ok(Some(principal))` | Successful authentication. |
//! | `Err(_)` | Credentials were present but invalid; stop the chain. |

pub mod bearer;
pub mod claims;
pub mod session;

pub use bearer::BearerAuthenticator;
pub use session::{SessionAuthenticator, SESSION_COOKIE};

use async_trait::async_trait;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use http::HeaderMap;

use crate::error::IamError;
use crate::models::Principal;

/// Credential-bearing view of an incoming request.
///
/// Carries headers (cookies included) only; authenticators never see the
/// request body.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
  headers: HeaderMap,
}

impl AuthRequest {
  pub fn new(headers: HeaderMap) -> Self {
    Self { headers }
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  /// Value of the named cookie, if present.
  pub fn cookie(&self, name: &str) -> Option<String> {
    CookieJar::from_headers(&self.headers)
      .get(name)
      .map(|cookie| cookie.value().to_string())
  }

  /// The bearer token from the `Authorization` header, if present.
  pub fn bearer_token(&self) -> Option<String> {
    self
      .headers
      .typed_get::<Authorization<Bearer>>()
      .map(|auth| auth.token().to_string())
  }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
  /// Short label used in spans and logs.
  fn name(&self) -> &'static str;

  async fn authenticate(&self, request: &AuthRequest) -> Result<Option<Principal>, IamError>;
}
