//! Cookie-based session authentication

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::auth::claims::{decode_claims_unverified, extract_groups};
use crate::auth::{AuthRequest, Authenticator};
use crate::contracts::{SessionRepository, UserRepository};
use crate::error::{AuthFailure, IamError};
use crate::models::Principal;
use crate::resolver::{PrincipalKey, RoleResolver};

pub const SESSION_COOKIE: &str = "grid.session";

/// Hex-encoded SHA-256 digest of an opaque token. The digest, never the raw
/// token, is the key stored on the server.
pub fn hash_token(raw_token: &str) -> String {
  hex::encode(Sha256::digest(raw_token.as_bytes()))
}

pub struct SessionAuthenticator {
  sessions: Arc<dyn SessionRepository>,
  users: Arc<dyn UserRepository>,
  resolver: Arc<RoleResolver>,
  cookie_name: String,
  groups_claim: String,
}

impl SessionAuthenticator {
  pub fn new(
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    resolver: Arc<RoleResolver>,
    cookie_name: String,
    groups_claim: String,
  ) -> Self {
    Self {
      sessions,
      users,
      resolver,
      cookie_name,
      groups_claim,
    }
  }

  /// Best-effort `last_used_at` bookkeeping. Runs on its own task so request
  /// cancellation never interrupts it, and the request never waits on it.
  fn touch_session(&self, session_id: crate::models::SessionId) {
    let sessions = Arc::clone(&self.sessions);
    tokio::spawn(async move {
      if let Err(err) = sessions.update_last_used(&session_id, Utc::now()).await {
        tracing::debug!(session_id = %session_id, error = %err, "session touch failed");
      }
    });
  }
}

#[async_trait::async_trait]
impl Authenticator for SessionAuthenticator {
  fn name(&self) -> &'static str {
    "session"
  }

  async fn authenticate(&self, request: &AuthRequest) -> Result<Option<Principal>, IamError> {
    let Some(raw_token) = request.cookie(&self.cookie_name) else {
      return Ok(None);
    };

    let token_hash = hash_token(&raw_token);
    let session = self
      .sessions
      .find_by_token_hash(&token_hash)
      .await?
      .ok_or(AuthFailure::InvalidCredential)?;

    if session.revoked {
      return Err(AuthFailure::SessionRevoked.into());
    }
    if session.expires_at <= Utc::now() {
      return Err(AuthFailure::SessionExpired.into());
    }
    let Some(user_id) = session.user_id.clone() else {
      return Err(AuthFailure::MalformedSession.into());
    };

    let user = self
      .users
      .find_by_id(&user_id)
      .await?
      .ok_or(AuthFailure::InvalidCredential)?;
    if user.is_disabled() {
      return Err(AuthFailure::PrincipalDisabled.into());
    }

    let groups = decode_claims_unverified(&session.id_token)
      .map(|claims| extract_groups(&claims, &self.groups_claim))
      .unwrap_or_default();

    let roles = self
      .resolver
      .resolve(&PrincipalKey::User(user.id.clone()), &groups)
      .await?;

    self.touch_session(session.id.clone());

    Ok(Some(Principal::for_user(
      &user,
      Some(session.id),
      groups,
      roles,
    )))
  }
}
