//! Token handler contract
//!
//! Signature verification and claim extraction live behind this trait; the
//! default JWT-backed implementation is [`crate::token::OidcTokenParser`].
//! Claims come back as loosely-typed JSON because identity providers vary in
//! where they put group membership and profile attributes.

use async_trait::async_trait;

use crate::error::IamError;

#[async_trait]
pub trait TokenParser: Send + Sync {
  /// Verify `raw_token` against the configured issuer and audience and
  /// return its claim set. Signature, audience, issuer and expiry failures
  /// surface as `AuthFailure::InvalidToken`.
  async fn parse(&self, raw_token: &str) -> Result<serde_json::Value, IamError>;
}
