//! Session and token-revocation operations

use chrono::{DateTime, Utc};

use crate::auth::session::hash_token;
use crate::error::IamError;
use crate::models::{NewSession, RevokedToken, Session, SessionId, UserId};

use super::IamService;

impl IamService {
  /// Mint an opaque session token for a user. Only the SHA-256 hash is
  /// persisted; the returned raw token is shown once and becomes the cookie
  /// value.
  #[tracing::instrument(skip(self, id_token), fields(user_id = %user_id))]
  pub async fn create_session(
    &self,
    user_id: &UserId,
    id_token: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<(Session, String), IamError> {
    let raw_token = Self::generate_opaque_token();
    let session = self
      .repos
      .sessions
      .create(&NewSession {
        user_id: Some(user_id.clone()),
        service_account_id: None,
        token_hash: hash_token(&raw_token),
        id_token: id_token.to_string(),
        expires_at,
      })
      .await?;
    tracing::info!(session_id = %session.id, "session created");
    Ok((session, raw_token))
  }

  #[tracing::instrument(skip(self), fields(session_id = %session_id))]
  pub async fn revoke_session(&self, session_id: &SessionId) -> Result<(), IamError> {
    self.repos.sessions.revoke(session_id, Utc::now()).await
  }

  pub async fn revoke_sessions_for_user(&self, user_id: &UserId) -> Result<(), IamError> {
    self.repos.sessions.revoke_by_user_id(user_id, Utc::now()).await
  }

  /// Record a bearer token's `jti` as revoked. The expiry is stored so the
  /// out-of-band cleaner can prune entries that could no longer verify
  /// anyway.
  #[tracing::instrument(skip(self))]
  pub async fn revoke_jti(
    &self,
    jti: &str,
    subject: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<(), IamError> {
    self
      .repos
      .revoked_tokens
      .insert(&RevokedToken {
        jti: jti.to_string(),
        subject: subject.to_string(),
        expires_at,
      })
      .await
  }

  pub async fn delete_expired_sessions(&self) -> Result<u64, IamError> {
    let removed = self.repos.sessions.delete_expired(Utc::now()).await?;
    if removed > 0 {
      tracing::info!(removed, "expired sessions pruned");
    }
    Ok(removed)
  }

  pub async fn delete_expired_revocations(&self) -> Result<u64, IamError> {
    let removed = self.repos.revoked_tokens.delete_expired(Utc::now()).await?;
    if removed > 0 {
      tracing::info!(removed, "expired token revocations pruned");
    }
    Ok(removed)
  }
}
