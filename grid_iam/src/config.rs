//! IAM configuration
//!
//! Loaded once at startup from YAML; everything request-scoped reads the
//! parsed struct.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::claims::DEFAULT_GROUPS_CLAIM;
use crate::auth::SESSION_COOKIE;
use crate::error::IamError;

/// Top-level IAM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamConfig {
  /// Cookie carrying the opaque session token.
  #[serde(default = "default_session_cookie")]
  pub session_cookie: String,

  /// Bearer authentication is enabled only when this section is present.
  #[serde(default)]
  pub oidc: Option<OidcConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
  pub issuer: String,
  pub audience: String,
  /// PEM for asymmetric algorithms, shared secret for HS*.
  pub decoding_key_pem: String,

  #[serde(default = "default_algorithm")]
  pub algorithm: String,

  /// Dot-separated path to the groups claim.
  #[serde(default = "default_groups_claim")]
  pub groups_claim: String,

  /// Whether an external identity provider is the source of truth for
  /// machine identities (enables JIT service-account provisioning).
  #[serde(default)]
  pub external_idp: bool,

  /// Clock-skew allowance in seconds for token validation.
  #[serde(default = "default_leeway")]
  pub leeway: u64,

  /// Defer decoding-key construction to first use; set when this process
  /// also hosts the issuer.
  #[serde(default)]
  pub lazy_keys: bool,
}

fn default_session_cookie() -> String {
  SESSION_COOKIE.to_string()
}

fn default_algorithm() -> String {
  "RS256".to_string()
}

fn default_groups_claim() -> String {
  DEFAULT_GROUPS_CLAIM.to_string()
}

fn default_leeway() -> u64 {
  60
}

impl Default for IamConfig {
  fn default() -> Self {
    Self {
      session_cookie: default_session_cookie(),
      oidc: None,
    }
  }
}

impl IamConfig {
  pub fn from_yaml(content: &str) -> Result<Self, IamError> {
    Ok(serde_yaml::from_str(content)?)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IamError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
      IamError::InvalidRequest(format!(
        "cannot read config {}: {}",
        path.as_ref().display(),
        e
      ))
    })?;
    Self::from_yaml(&content)
  }
}
