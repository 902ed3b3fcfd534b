//! JWT-backed implementation of the token handler contract

use std::sync::OnceLock;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::config::OidcConfig;
use crate::contracts::TokenParser;
use crate::error::{AuthFailure, IamError};

/// Verifies bearer tokens against a configured issuer and audience.
///
/// The decoding key is normally built at construction so a bad key fails the
/// process early. When this process also hosts the issuer, eager loading
/// races the issuer's own key generation; `lazy_keys` defers building the
/// key until the first token arrives.
pub struct OidcTokenParser {
  validation: Validation,
  algorithm: Algorithm,
  key_pem: String,
  key: OnceLock<DecodingKey>,
}

impl OidcTokenParser {
  pub fn from_config(config: &OidcConfig) -> Result<Self, IamError> {
    let algorithm: Algorithm = config
      .algorithm
      .parse()
      .map_err(|e| IamError::InvalidRequest(format!("unknown JWT algorithm: {}", e)))?;

    let mut validation = Validation::new(algorithm);
    validation.leeway = config.leeway;
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);
    validation.set_audience(&[&config.audience]);
    validation.set_issuer(&[&config.issuer]);

    let parser = Self {
      validation,
      algorithm,
      key_pem: config.decoding_key_pem.replace("\\n", "\n"),
      key: OnceLock::new(),
    };
    if !config.lazy_keys {
      parser.decoding_key()?;
    }
    Ok(parser)
  }

  fn decoding_key(&self) -> Result<&DecodingKey, IamError> {
    if let Some(key) = self.key.get() {
      return Ok(key);
    }
    let built = build_decoding_key(self.algorithm, &self.key_pem)?;
    let _ = self.key.set(built);
    self
      .key
      .get()
      .ok_or_else(|| IamError::Internal("decoding key initialization raced".to_string()))
  }
}

fn build_decoding_key(algorithm: Algorithm, pem: &str) -> Result<DecodingKey, IamError> {
  let key = match algorithm {
    Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
      return Ok(DecodingKey::from_secret(pem.as_bytes()));
    }
    Algorithm::RS256
    | Algorithm::RS384
    | Algorithm::RS512
    | Algorithm::PS256
    | Algorithm::PS384
    | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem.as_bytes()),
    Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem.as_bytes()),
    Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
  };
  key.map_err(|e| IamError::InvalidRequest(format!("invalid decoding key: {}", e)))
}

#[async_trait]
impl TokenParser for OidcTokenParser {
  async fn parse(&self, raw_token: &str) -> Result<serde_json::Value, IamError> {
    let key = self.decoding_key()?;
    let data = decode::<serde_json::Value>(raw_token, key, &self.validation)
      .map_err(|e| AuthFailure::InvalidToken(e.to_string()))?;
    Ok(data.claims)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;
  use chrono::{Duration, Utc};
  use jsonwebtoken::{encode, EncodingKey, Header};
  use serde_json::json;

  const SECRET: &str = "unit-test-secret";

  fn config() -> OidcConfig {
    OidcConfig {
      issuer: "https://issuer.grid.test".to_string(),
      audience: "grid-api".to_string(),
      decoding_key_pem: SECRET.to_string(),
      algorithm: "HS256".to_string(),
      groups_claim: "groups".to_string(),
      external_idp: false,
      leeway: 0,
      lazy_keys: false,
    }
  }

  fn sign(claims: serde_json::Value) -> String {
    encode(
      &Header::new(Algorithm::HS256),
      &claims,
      &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
  }

  fn valid_claims() -> serde_json::Value {
    json!({
      "iss": "https://issuer.grid.test",
      "aud": "grid-api",
      "sub": "bob@x",
      "jti": "j-1",
      "exp": (Utc::now() + Duration::hours(1)).timestamp(),
    })
  }

  #[tokio::test]
  async fn valid_token_should_return_claims() -> Result<()> {
    let parser = OidcTokenParser::from_config(&config())?;
    let claims = parser.parse(&sign(valid_claims())).await?;
    assert_eq!(claims["sub"], "bob@x");
    assert_eq!(claims["jti"], "j-1");
    Ok(())
  }

  #[tokio::test]
  async fn expired_token_should_fail_invalid_token() -> Result<()> {
    let parser = OidcTokenParser::from_config(&config())?;
    let mut claims = valid_claims();
    claims["exp"] = json!((Utc::now() - Duration::hours(1)).timestamp());
    let err = parser.parse(&sign(claims)).await.unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::InvalidToken(_))
    ));
    Ok(())
  }

  #[tokio::test]
  async fn wrong_audience_should_fail_invalid_token() -> Result<()> {
    let parser = OidcTokenParser::from_config(&config())?;
    let mut claims = valid_claims();
    claims["aud"] = json!("other-api");
    let err = parser.parse(&sign(claims)).await.unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::InvalidToken(_))
    ));
    Ok(())
  }

  #[tokio::test]
  async fn tampered_signature_should_fail_invalid_token() -> Result<()> {
    let parser = OidcTokenParser::from_config(&config())?;
    let token = sign(valid_claims());
    let tampered = format!("{}x", token);
    let err = parser.parse(&tampered).await.unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::InvalidToken(_))
    ));
    Ok(())
  }

  #[test]
  fn bad_rsa_key_should_fail_eagerly_unless_lazy() {
    let mut cfg = config();
    cfg.algorithm = "RS256".to_string();
    cfg.decoding_key_pem = "not a pem".to_string();

    assert!(OidcTokenParser::from_config(&cfg).is_err());

    cfg.lazy_keys = true;
    assert!(OidcTokenParser::from_config(&cfg).is_ok());
  }

  #[tokio::test]
  async fn lazy_bad_key_should_fail_on_first_parse() -> Result<()> {
    let mut cfg = config();
    cfg.algorithm = "RS256".to_string();
    cfg.decoding_key_pem = "not a pem".to_string();
    cfg.lazy_keys = true;

    let parser = OidcTokenParser::from_config(&cfg)?;
    assert!(parser.parse("whatever").await.is_err());
    Ok(())
  }
}
