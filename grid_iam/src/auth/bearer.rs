//! Bearer-token authentication with JIT provisioning
//!
//! A verified token resolves to a user when the subject is known or the
//! claims carry an email; otherwise it is treated as a machine identity and
//! resolved against the service-account table, provisioning a record when an
//! external identity provider is the source of truth.

use std::sync::Arc;

use chrono::Utc;

use crate::auth::claims::{extract_groups, string_claim};
use crate::auth::{AuthRequest, Authenticator};
use crate::contracts::{
  RevokedTokenRepository, ServiceAccountRepository, TokenParser, UserRepository,
};
use crate::error::{AuthFailure, IamError};
use crate::models::{
  client_id_from_subject, CreateServiceAccount, CreateUser, Principal,
  EXTERNAL_IDP_MANAGED_SECRET,
};
use crate::resolver::{PrincipalKey, RoleResolver};

pub struct BearerAuthenticator {
  parser: Arc<dyn TokenParser>,
  users: Arc<dyn UserRepository>,
  service_accounts: Arc<dyn ServiceAccountRepository>,
  revoked_tokens: Arc<dyn RevokedTokenRepository>,
  resolver: Arc<RoleResolver>,
  groups_claim: String,
  /// When true, unknown machine identities are provisioned on first valid
  /// token; when false (internal issuer only) they are rejected.
  external_idp: bool,
}

impl BearerAuthenticator {
  pub fn new(
    parser: Arc<dyn TokenParser>,
    users: Arc<dyn UserRepository>,
    service_accounts: Arc<dyn ServiceAccountRepository>,
    revoked_tokens: Arc<dyn RevokedTokenRepository>,
    resolver: Arc<RoleResolver>,
    groups_claim: String,
    external_idp: bool,
  ) -> Self {
    Self {
      parser,
      users,
      service_accounts,
      revoked_tokens,
      resolver,
      groups_claim,
      external_idp,
    }
  }

  async fn resolve_user(
    &self,
    subject: &str,
    email: Option<String>,
    name: Option<String>,
    groups: Vec<String>,
  ) -> Result<Option<Principal>, IamError> {
    let user = match self.users.find_by_subject(subject).await? {
      Some(user) => {
        if let Err(err) = self.users.update_last_login(&user.id, Utc::now()).await {
          tracing::debug!(user_id = %user.id, error = %err, "last_login update failed");
        }
        user
      }
      None => match email {
        Some(email) => {
          let name = name.unwrap_or_default();
          let user = self
            .users
            .create(&CreateUser::new(Some(subject), &email, &name))
            .await?;
          tracing::info!(user_id = %user.id, subject, "provisioned user from token claims");
          user
        }
        None => return Ok(None),
      },
    };

    let roles = self
      .resolver
      .resolve(&PrincipalKey::User(user.id.clone()), &groups)
      .await?;
    Ok(Some(Principal::for_user(&user, None, groups, roles)))
  }

  async fn resolve_service_account(
    &self,
    subject: &str,
    groups: Vec<String>,
  ) -> Result<Principal, IamError> {
    let client_id = client_id_from_subject(subject);
    let account = match self.service_accounts.find_by_client_id(client_id).await? {
      Some(account) => {
        if let Err(err) = self
          .service_accounts
          .update_last_used(&account.id, Utc::now())
          .await
        {
          tracing::debug!(client_id, error = %err, "last_used update failed");
        }
        account
      }
      None if self.external_idp => {
        let account = self
          .service_accounts
          .create(&CreateServiceAccount {
            name: client_id.to_string(),
            client_id: client_id.to_string(),
            client_secret_hash: EXTERNAL_IDP_MANAGED_SECRET.to_string(),
            description: String::new(),
            created_by: "external-idp".to_string(),
          })
          .await?;
        tracing::info!(client_id, "provisioned service account from external idp token");
        account
      }
      None => {
        return Err(AuthFailure::UnknownServiceAccount(client_id.to_string()).into());
      }
    };

    let roles = self
      .resolver
      .resolve(&PrincipalKey::ServiceAccount(account.id.clone()), &groups)
      .await?;
    Ok(Principal::for_service_account(&account, groups, roles))
  }
}

#[async_trait::async_trait]
impl Authenticator for BearerAuthenticator {
  fn name(&self) -> &'static str {
    "bearer"
  }

  async fn authenticate(&self, request: &AuthRequest) -> Result<Option<Principal>, IamError> {
    let Some(raw_token) = request.bearer_token() else {
      return Ok(None);
    };

    let claims = self.parser.parse(&raw_token).await?;

    let jti = string_claim(&claims, "jti")
      .ok_or_else(|| AuthFailure::MalformedToken("missing jti claim".to_string()))?;
    let subject = string_claim(&claims, "sub")
      .ok_or_else(|| AuthFailure::MalformedToken("missing sub claim".to_string()))?;
    let email = string_claim(&claims, "email");
    let name = string_claim(&claims, "name");
    let groups = extract_groups(&claims, &self.groups_claim);

    if self.revoked_tokens.is_revoked(&jti).await? {
      return Err(AuthFailure::TokenRevoked.into());
    }

    if let Some(principal) = self
      .resolve_user(&subject, email, name, groups.clone())
      .await?
    {
      return Ok(Some(principal));
    }

    // No user record and no email to provision one from: machine identity.
    let principal = self.resolve_service_account(&subject, groups).await?;
    Ok(Some(principal))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::GroupRoleCache;
  use crate::contracts::ServiceAccountRepository;
  use crate::models::{ServiceAccount, ServiceAccountId};
  use crate::testing::{
    InMemoryGroupBindings, InMemoryRevokedTokens, InMemoryRoleAssignments, InMemoryRoles,
    InMemoryServiceAccounts, InMemoryUsers, StaticTokenParser,
  };
  use anyhow::Result;
  use chrono::{Duration, Utc};
  use http::header::AUTHORIZATION;
  use http::HeaderMap;
  use serde_json::json;

  struct Fixture {
    authenticator: BearerAuthenticator,
    parser: Arc<StaticTokenParser>,
    users: Arc<InMemoryUsers>,
    service_accounts: Arc<InMemoryServiceAccounts>,
    revoked_tokens: Arc<InMemoryRevokedTokens>,
  }

  async fn fixture(external_idp: bool) -> Result<Fixture> {
    let parser = Arc::new(StaticTokenParser::default());
    let users = Arc::new(InMemoryUsers::default());
    let service_accounts = Arc::new(InMemoryServiceAccounts::default());
    let revoked_tokens = Arc::new(InMemoryRevokedTokens::default());
    let assignments = Arc::new(InMemoryRoleAssignments::default());
    let bindings = Arc::new(InMemoryGroupBindings::default());
    let roles = Arc::new(InMemoryRoles::default());
    let cache = Arc::new(GroupRoleCache::new(bindings, roles.clone()).await?);
    let resolver = Arc::new(RoleResolver::new(assignments, roles, cache));
    let authenticator = BearerAuthenticator::new(
      parser.clone(),
      users.clone(),
      service_accounts.clone(),
      revoked_tokens.clone(),
      resolver,
      "groups".to_string(),
      external_idp,
    );
    Ok(Fixture {
      authenticator,
      parser,
      users,
      service_accounts,
      revoked_tokens,
    })
  }

  fn request_with_bearer(token: &str) -> AuthRequest {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
    AuthRequest::new(headers)
  }

  #[tokio::test]
  async fn no_authorization_header_should_pass_to_next() -> Result<()> {
    let f = fixture(true).await?;
    assert!(f
      .authenticator
      .authenticate(&AuthRequest::default())
      .await?
      .is_none());
    Ok(())
  }

  #[tokio::test]
  async fn unverifiable_token_should_fail_invalid_token() -> Result<()> {
    let f = fixture(true).await?;
    let err = f
      .authenticator
      .authenticate(&request_with_bearer("garbage"))
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::InvalidToken(_))
    ));
    Ok(())
  }

  #[tokio::test]
  async fn missing_required_claims_should_fail_malformed() -> Result<()> {
    let f = fixture(true).await?;
    f.parser.insert("t1", json!({"sub": "bob"}));
    let err = f
      .authenticator
      .authenticate(&request_with_bearer("t1"))
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::MalformedToken(_))
    ));

    f.parser.insert("t2", json!({"jti": "j-1", "sub": ""}));
    let err = f
      .authenticator
      .authenticate(&request_with_bearer("t2"))
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::MalformedToken(_))
    ));
    Ok(())
  }

  #[tokio::test]
  async fn revoked_jti_should_fail() -> Result<()> {
    let f = fixture(true).await?;
    f.parser
      .insert("t", json!({"jti": "j-1", "sub": "bob@x", "email": "bob@x"}));
    f.revoked_tokens
      .insert(&crate::models::RevokedToken {
        jti: "j-1".to_string(),
        subject: "bob@x".to_string(),
        expires_at: Utc::now() + Duration::hours(1),
      })
      .await?;

    let err = f
      .authenticator
      .authenticate(&request_with_bearer("t"))
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::TokenRevoked)
    ));
    Ok(())
  }

  #[tokio::test]
  async fn known_subject_should_authenticate_as_user() -> Result<()> {
    let f = fixture(true).await?;
    f.users
      .create(&CreateUser::new(Some("bob@x"), "bob@x", "Bob"))
      .await?;
    f.parser.insert(
      "t",
      json!({"jti": "j-1", "sub": "bob@x", "groups": ["eng"]}),
    );

    let principal = f
      .authenticator
      .authenticate(&request_with_bearer("t"))
      .await?
      .expect("principal");
    assert_eq!(principal.principal_id, "user:bob@x");
    assert_eq!(principal.groups, vec!["eng".to_string()]);
    assert!(principal.session_id.is_none());

    let user = f.users.find_by_subject("bob@x").await?.unwrap();
    assert!(user.last_login_at.is_some());
    Ok(())
  }

  #[tokio::test]
  async fn unknown_subject_with_email_should_provision_user() -> Result<()> {
    let f = fixture(false).await?;
    f.parser.insert(
      "t",
      json!({"jti": "j-1", "sub": "oidc|123", "email": "carol@x", "name": "Carol"}),
    );

    let principal = f
      .authenticator
      .authenticate(&request_with_bearer("t"))
      .await?
      .expect("principal");
    assert_eq!(principal.subject, "oidc|123");
    assert_eq!(principal.email.as_deref(), Some("carol@x"));

    let user = f.users.find_by_subject("oidc|123").await?.unwrap();
    assert_eq!(user.email, "carol@x");
    Ok(())
  }

  #[tokio::test]
  async fn known_machine_identity_should_authenticate_as_service_account() -> Result<()> {
    let f = fixture(false).await?;
    f.service_accounts.insert(ServiceAccount {
      id: ServiceAccountId::new("sa-rec-1"),
      name: "deployer".to_string(),
      client_id: "c-9".to_string(),
      client_secret_hash: "$2b$12$x".to_string(),
      description: String::new(),
      disabled: false,
      created_by: "admin".to_string(),
      secret_rotated_at: Utc::now(),
      last_used_at: None,
      created_at: Utc::now(),
    });
    f.parser.insert("t", json!({"jti": "j-1", "sub": "sa:c-9"}));

    let principal = f
      .authenticator
      .authenticate(&request_with_bearer("t"))
      .await?
      .expect("principal");
    assert_eq!(principal.principal_id, "service_account:deployer");
    assert_eq!(principal.subject, "c-9");

    let account = f.service_accounts.find_by_client_id("c-9").await?.unwrap();
    assert!(account.last_used_at.is_some());
    Ok(())
  }

  #[tokio::test]
  async fn unknown_machine_identity_should_provision_when_external_idp() -> Result<()> {
    let f = fixture(true).await?;
    f.parser.insert("t", json!({"jti": "j-1", "sub": "sa:c-new"}));

    let principal = f
      .authenticator
      .authenticate(&request_with_bearer("t"))
      .await?
      .expect("principal");
    assert!(principal.is_service_account());

    let account = f
      .service_accounts
      .find_by_client_id("c-new")
      .await?
      .expect("provisioned");
    assert!(account.is_externally_managed());
    Ok(())
  }

  #[tokio::test]
  async fn unknown_machine_identity_should_fail_with_internal_issuer() -> Result<()> {
    let f = fixture(false).await?;
    f.parser.insert("t", json!({"jti": "j-1", "sub": "sa:c-new"}));

    let err = f
      .authenticator
      .authenticate(&request_with_bearer("t"))
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::UnknownServiceAccount(_))
    ));
    Ok(())
  }
}
