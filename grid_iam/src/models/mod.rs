pub mod ids;
pub mod principal;

pub use ids::*;
pub use principal::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Sentinel secret-hash marker for service accounts whose credentials live
/// entirely at an external identity provider. Such accounts can never pass a
/// local secret check.
pub const EXTERNAL_IDP_MANAGED_SECRET: &str = "EXTERNAL_IDP_MANAGED";

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct User {
  pub id: UserId,
  /// Stable identity from the identity provider (OIDC `sub`); users created
  /// before federation may only have an email.
  pub subject: Option<String>,
  pub email: String,
  pub name: String,
  #[sqlx(default)]
  #[serde(skip)]
  pub password_hash: Option<String>,
  pub disabled_at: Option<DateTime<Utc>>,
  pub last_login_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl User {
  /// The unprefixed stable identity used to address this user everywhere.
  pub fn stable_subject(&self) -> &str {
    self.subject.as_deref().unwrap_or(&self.email)
  }

  pub fn is_disabled(&self) -> bool {
    self.disabled_at.is_some()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateUser {
  pub subject: Option<String>,
  #[validate(email)]
  pub email: String,
  pub name: String,
}

impl CreateUser {
  pub fn new(subject: Option<&str>, email: &str, name: &str) -> Self {
    Self {
      subject: subject.map(str::to_string),
      email: email.to_string(),
      name: name.to_string(),
    }
  }
}

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct ServiceAccount {
  pub id: ServiceAccountId,
  pub name: String,
  pub client_id: String,
  #[serde(skip)]
  pub client_secret_hash: String,
  pub description: String,
  pub disabled: bool,
  pub created_by: String,
  pub secret_rotated_at: DateTime<Utc>,
  pub last_used_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl ServiceAccount {
  /// Accounts provisioned from an external IdP have no local secret.
  pub fn is_externally_managed(&self) -> bool {
    self.client_secret_hash == EXTERNAL_IDP_MANAGED_SECRET
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateServiceAccount {
  #[validate(length(min = 1, max = 128))]
  pub name: String,
  pub client_id: String,
  pub client_secret_hash: String,
  pub description: String,
  pub created_by: String,
}

/// Opaque-token session. `token_hash` is the SHA-256 hex digest of the raw
/// cookie value; the raw token is never stored.
#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct Session {
  pub id: SessionId,
  pub user_id: Option<UserId>,
  pub service_account_id: Option<ServiceAccountId>,
  #[serde(skip)]
  pub token_hash: String,
  #[serde(skip)]
  pub id_token: String,
  pub expires_at: DateTime<Utc>,
  pub revoked: bool,
  pub last_used_at: DateTime<Utc>,
  pub revoked_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
  pub user_id: Option<UserId>,
  pub service_account_id: Option<ServiceAccountId>,
  pub token_hash: String,
  pub id_token: String,
  pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct RoleAssignment {
  pub id: String,
  pub role_id: RoleId,
  pub user_id: Option<UserId>,
  pub service_account_id: Option<ServiceAccountId>,
  pub assigned_by: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRoleAssignment {
  pub role_id: RoleId,
  pub user_id: Option<UserId>,
  pub service_account_id: Option<ServiceAccountId>,
  pub assigned_by: String,
}

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct GroupRoleBinding {
  pub id: String,
  pub group_name: String,
  pub role_id: RoleId,
  pub assigned_by: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGroupRoleBinding {
  pub group_name: String,
  pub role_id: RoleId,
  pub assigned_by: String,
}

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct Role {
  pub id: RoleId,
  pub name: String,
  pub description: String,
  /// Attribute expression gating the role's policies; empty means
  /// unconditional.
  pub scope_expr: String,
  pub create_constraints: serde_json::Value,
  pub immutable_keys: Vec<String>,
  /// Optimistic concurrency token, starts at 1.
  pub version: i32,
  /// `"<object>:<action>"` strings this role allows.
  pub actions: Vec<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRole {
  #[validate(length(min = 1, max = 128))]
  pub name: String,
  pub description: String,
  pub scope_expr: String,
  pub create_constraints: serde_json::Value,
  pub immutable_keys: Vec<String>,
  pub actions: Vec<String>,
}

impl CreateRole {
  pub fn new(name: &str, actions: &[&str]) -> Self {
    Self {
      name: name.to_string(),
      description: String::new(),
      scope_expr: String::new(),
      create_constraints: serde_json::Value::Null,
      immutable_keys: Vec::new(),
      actions: actions.iter().map(|a| a.to_string()).collect(),
    }
  }
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRole {
  pub description: Option<String>,
  pub scope_expr: Option<String>,
  pub create_constraints: Option<serde_json::Value>,
  pub immutable_keys: Option<Vec<String>>,
  pub actions: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct RevokedToken {
  pub jti: String,
  pub subject: String,
  /// Kept so an out-of-band cleaner can prune entries that could no longer
  /// verify anyway.
  pub expires_at: DateTime<Utc>,
}
