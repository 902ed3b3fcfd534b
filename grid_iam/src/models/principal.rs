//! Authenticated principal and the wire encoding of principal identifiers
//!
//! The policy engine is addressed with prefixed identifiers; every prefix
//! lives here so the encoding cannot drift between call sites.

use serde::{Deserialize, Serialize};

use super::{ServiceAccount, SessionId, User};

/// Build the enforcer identifier for a user, addressed by stable subject.
pub fn user_principal_id(subject: &str) -> String {
  format!("user:{subject}")
}

/// Build the enforcer identifier a service account authorizes as, addressed
/// by account name.
pub fn service_account_principal_id(name: &str) -> String {
  format!("service_account:{name}")
}

/// Build the grouping key written when roles are assigned to a service
/// account. Administrative flows operate on client id, authorization on
/// name; the two encodings are intentionally distinct.
pub fn service_account_grouping_id(client_id: &str) -> String {
  format!("sa:{client_id}")
}

/// Build the enforcer identifier for a group.
pub fn group_subject(group_name: &str) -> String {
  format!("group:{group_name}")
}

/// Build the enforcer identifier for a role.
pub fn role_subject(role_name: &str) -> String {
  format!("role:{role_name}")
}

/// Derive a service-account client id from a token subject, tolerating the
/// `sa:` prefix some issuers put on machine identities.
pub fn client_id_from_subject(subject: &str) -> &str {
  subject.strip_prefix("sa:").unwrap_or(subject)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
  User,
  ServiceAccount,
}

impl std::fmt::Display for PrincipalType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PrincipalType::User => write!(f, "user"),
      PrincipalType::ServiceAccount => write!(f, "service_account"),
    }
  }
}

/// Immutable result of a successful authentication.
///
/// Constructed once per request with the effective role set already
/// resolved; authorization reads `roles` and nothing else, so the decision
/// stays internally consistent for the life of the request even while the
/// group-role cache or assignments change underneath.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
  /// Unprefixed stable identity (email, OIDC `sub`, or client id).
  pub subject: String,
  /// Enforcer-facing identifier with type prefix.
  pub principal_id: String,
  /// Durable primary key of the backing user or service-account record.
  pub internal_id: String,
  pub email: Option<String>,
  pub name: Option<String>,
  /// Present only for cookie-authenticated sessions.
  pub session_id: Option<SessionId>,
  /// Group names carried from claims or the stored token, in claim order.
  pub groups: Vec<String>,
  /// Deduplicated effective role names; the source of truth for
  /// authorization.
  pub roles: Vec<String>,
  pub principal_type: PrincipalType,
}

impl Principal {
  pub fn for_user(
    user: &User,
    session_id: Option<SessionId>,
    groups: Vec<String>,
    roles: Vec<String>,
  ) -> Self {
    let subject = user.stable_subject().to_string();
    Self {
      principal_id: user_principal_id(&subject),
      subject,
      internal_id: user.id.as_str().to_string(),
      email: Some(user.email.clone()),
      name: Some(user.name.clone()),
      session_id,
      groups,
      roles,
      principal_type: PrincipalType::User,
    }
  }

  pub fn for_service_account(
    account: &ServiceAccount,
    groups: Vec<String>,
    roles: Vec<String>,
  ) -> Self {
    Self {
      subject: account.client_id.clone(),
      principal_id: service_account_principal_id(&account.name),
      internal_id: account.id.as_str().to_string(),
      email: None,
      name: Some(account.name.clone()),
      session_id: None,
      groups,
      roles,
      principal_type: PrincipalType::ServiceAccount,
    }
  }

  pub fn is_service_account(&self) -> bool {
    self.principal_type == PrincipalType::ServiceAccount
  }

  pub fn has_role(&self, role_name: &str) -> bool {
    self.roles.iter().any(|r| r == role_name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{ServiceAccountId, UserId};
  use chrono::Utc;

  fn sample_user() -> User {
    User {
      id: UserId::new("u-1"),
      subject: Some("alice@example.com".to_string()),
      email: "alice@example.com".to_string(),
      name: "Alice".to_string(),
      password_hash: None,
      disabled_at: None,
      last_login_at: None,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn user_principal_should_carry_prefixed_id() {
    let principal = Principal::for_user(
      &sample_user(),
      Some(SessionId::new("s-1")),
      vec!["platform-engineers".to_string()],
      vec!["viewer".to_string()],
    );
    assert_eq!(principal.principal_id, "user:alice@example.com");
    assert_eq!(principal.subject, "alice@example.com");
    assert_eq!(principal.session_id, Some(SessionId::new("s-1")));
    assert!(principal.has_role("viewer"));
    assert!(!principal.is_service_account());
  }

  #[test]
  fn service_account_principal_should_authorize_by_name() {
    let account = ServiceAccount {
      id: ServiceAccountId::new("sa-rec-1"),
      name: "deployer".to_string(),
      client_id: "client-9".to_string(),
      client_secret_hash: "$2b$12$abc".to_string(),
      description: String::new(),
      disabled: false,
      created_by: "admin".to_string(),
      secret_rotated_at: Utc::now(),
      last_used_at: None,
      created_at: Utc::now(),
    };
    let principal = Principal::for_service_account(&account, vec![], vec![]);
    assert_eq!(principal.principal_id, "service_account:deployer");
    assert_eq!(principal.subject, "client-9");
    assert!(principal.is_service_account());
  }

  #[test]
  fn wire_prefixes_should_be_stable() {
    assert_eq!(user_principal_id("bob"), "user:bob");
    assert_eq!(service_account_grouping_id("c-1"), "sa:c-1");
    assert_eq!(group_subject("platform-engineers"), "group:platform-engineers");
    assert_eq!(role_subject("viewer"), "role:viewer");
    assert_eq!(client_id_from_subject("sa:c-1"), "c-1");
    assert_eq!(client_id_from_subject("c-1"), "c-1");
  }
}
