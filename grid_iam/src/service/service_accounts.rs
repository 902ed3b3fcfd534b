//! Service-account provisioning, revocation and secret management

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AuthFailure, IamError};
use crate::models::{
  service_account_grouping_id, CreateServiceAccount, ServiceAccount, EXTERNAL_IDP_MANAGED_SECRET,
};

use super::IamService;

/// Fixed bcrypt cost for client-secret hashes.
pub const SECRET_HASH_COST: u32 = 12;

fn hash_secret(secret: &str) -> Result<String, IamError> {
  bcrypt::hash(secret, SECRET_HASH_COST)
    .map_err(|e| IamError::Internal(format!("secret hashing failed: {}", e)))
}

impl IamService {
  /// Create a service account with a freshly minted client id and secret.
  /// The secret is returned exactly once; only its bcrypt hash persists.
  #[tracing::instrument(skip(self))]
  pub async fn create_service_account(
    &self,
    name: &str,
    description: &str,
    created_by: &str,
  ) -> Result<(ServiceAccount, String), IamError> {
    let secret = Self::generate_opaque_token();
    let input = CreateServiceAccount {
      name: name.to_string(),
      client_id: format!("svc-{}", Uuid::new_v4()),
      client_secret_hash: hash_secret(&secret)?,
      description: description.to_string(),
      created_by: created_by.to_string(),
    };
    input
      .validate()
      .map_err(|e| IamError::InvalidRequest(e.to_string()))?;

    let account = self.repos.service_accounts.create(&input).await?;
    tracing::info!(client_id = %account.client_id, "service account created");
    Ok((account, secret))
  }

  /// Disable the account, revoke its sessions, and drop every enforcer
  /// grouping for it, in that order.
  #[tracing::instrument(skip(self))]
  pub async fn revoke_service_account(&self, client_id: &str) -> Result<(), IamError> {
    let account = self.get_service_account(client_id).await?;

    self
      .repos
      .service_accounts
      .set_disabled(&account.id, true)
      .await?;
    self
      .repos
      .sessions
      .revoke_by_service_account_id(&account.id, Utc::now())
      .await?;
    self
      .enforcer
      .delete_all_groupings_for(&service_account_grouping_id(client_id))
      .await?;

    tracing::info!(client_id, "service account revoked");
    Ok(())
  }

  /// Replace the account's secret; returns the new secret (shown once) and
  /// the rotation instant.
  #[tracing::instrument(skip(self))]
  pub async fn rotate_service_account_secret(
    &self,
    client_id: &str,
  ) -> Result<(String, DateTime<Utc>), IamError> {
    let account = self.get_service_account(client_id).await?;

    let secret = Self::generate_opaque_token();
    let rotated_at = Utc::now();
    self
      .repos
      .service_accounts
      .update_secret_hash(&account.id, &hash_secret(&secret)?, rotated_at)
      .await?;

    tracing::info!(client_id, "service account secret rotated");
    Ok((secret, rotated_at))
  }

  /// Check a presented client secret. Disabled accounts and accounts whose
  /// credentials live at an external IdP never verify locally.
  pub async fn verify_service_account_secret(
    &self,
    client_id: &str,
    secret: &str,
  ) -> Result<ServiceAccount, IamError> {
    let account = self
      .repos
      .service_accounts
      .find_by_client_id(client_id)
      .await?
      .ok_or(AuthFailure::InvalidCredential)?;

    if account.disabled {
      return Err(AuthFailure::PrincipalDisabled.into());
    }
    if account.is_externally_managed() {
      return Err(AuthFailure::InvalidCredential.into());
    }

    let ok = bcrypt::verify(secret, &account.client_secret_hash)
      .map_err(|e| IamError::Internal(format!("secret verification failed: {}", e)))?;
    if !ok {
      return Err(AuthFailure::InvalidCredential.into());
    }

    if let Err(err) = self
      .repos
      .service_accounts
      .update_last_used(&account.id, Utc::now())
      .await
    {
      tracing::debug!(client_id, error = %err, "last_used update failed");
    }
    Ok(account)
  }
}

#[cfg(test)]
mod tests {
  use super::super::test_support::harness;
  use super::*;
  use crate::models::{CreateRole, PrincipalType};
  use anyhow::Result;

  #[tokio::test]
  async fn created_secret_should_verify_until_rotation() -> Result<()> {
    let h = harness().await;
    let (account, secret) = h
      .service
      .create_service_account("deployer", "CI deployments", "admin")
      .await?;
    assert_eq!(secret.len(), 64);
    assert_ne!(account.client_secret_hash, secret);

    h.service
      .verify_service_account_secret(&account.client_id, &secret)
      .await?;

    let (new_secret, rotated_at) = h
      .service
      .rotate_service_account_secret(&account.client_id)
      .await?;
    assert_ne!(new_secret, secret);
    assert!(rotated_at >= account.secret_rotated_at);

    let err = h
      .service
      .verify_service_account_secret(&account.client_id, &secret)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::InvalidCredential)
    ));
    h.service
      .verify_service_account_secret(&account.client_id, &new_secret)
      .await?;
    Ok(())
  }

  #[tokio::test]
  async fn revocation_should_disable_and_unlink_roles() -> Result<()> {
    let h = harness().await;
    let (account, secret) = h
      .service
      .create_service_account("deployer", "", "admin")
      .await?;
    let role = h
      .service
      .create_role(&CreateRole::new("pusher", &["state:write"]))
      .await?;
    h.service
      .assign_user_role(None, Some(&account.id), &role.id, "admin")
      .await?;

    h.service.revoke_service_account(&account.client_id).await?;

    let refreshed = h.service.get_service_account(&account.client_id).await?;
    assert!(refreshed.disabled);

    let roles = h
      .service
      .get_principal_roles(&account.client_id, PrincipalType::ServiceAccount)
      .await?;
    assert!(roles.is_empty());

    let err = h
      .service
      .verify_service_account_secret(&account.client_id, &secret)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::PrincipalDisabled)
    ));
    Ok(())
  }

  #[tokio::test]
  async fn externally_managed_accounts_should_never_verify_locally() -> Result<()> {
    let h = harness().await;
    h.service_accounts.insert(crate::models::ServiceAccount {
      id: crate::models::ServiceAccountId::new("sa-ext"),
      name: "external".to_string(),
      client_id: "c-ext".to_string(),
      client_secret_hash: EXTERNAL_IDP_MANAGED_SECRET.to_string(),
      description: String::new(),
      disabled: false,
      created_by: "external-idp".to_string(),
      secret_rotated_at: Utc::now(),
      last_used_at: None,
      created_at: Utc::now(),
    });

    let err = h
      .service
      .verify_service_account_secret("c-ext", EXTERNAL_IDP_MANAGED_SECRET)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::InvalidCredential)
    ));
    Ok(())
  }

  #[tokio::test]
  async fn unknown_client_should_fail_invalid_credential() -> Result<()> {
    let h = harness().await;
    let err = h
      .service
      .verify_service_account_secret("nope", "secret")
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      IamError::Unauthenticated(AuthFailure::InvalidCredential)
    ));
    Ok(())
  }
}
