//! Store repository contracts
//!
//! The relational store lives outside this crate; these traits are the
//! surface the IAM core consumes. Absence is expressed as `Ok(None)` so
//! callers can distinguish "not found" from transport faults, which arrive
//! as `IamError::Store`. Duplicate inserts surface as
//! `IamError::UniqueViolation`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IamError;
use crate::models::{
  CreateServiceAccount, CreateUser, GroupRoleBinding, NewGroupRoleBinding, NewRoleAssignment,
  NewSession, RevokedToken, Role, RoleAssignment, RoleId, ServiceAccount, ServiceAccountId,
  Session, SessionId, User, UserId,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
  async fn create(&self, input: &CreateUser) -> Result<User, IamError>;

  async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, IamError>;

  async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, IamError>;

  async fn find_by_email(&self, email: &str) -> Result<Option<User>, IamError>;

  async fn list(&self) -> Result<Vec<User>, IamError>;

  async fn set_disabled(&self, id: &UserId, disabled_at: Option<DateTime<Utc>>)
  -> Result<(), IamError>;

  async fn update_last_login(&self, id: &UserId, at: DateTime<Utc>) -> Result<(), IamError>;
}

#[async_trait]
pub trait ServiceAccountRepository: Send + Sync {
  async fn create(&self, input: &CreateServiceAccount) -> Result<ServiceAccount, IamError>;

  async fn find_by_id(&self, id: &ServiceAccountId) -> Result<Option<ServiceAccount>, IamError>;

  async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ServiceAccount>, IamError>;

  async fn find_by_name(&self, name: &str) -> Result<Option<ServiceAccount>, IamError>;

  async fn list(&self) -> Result<Vec<ServiceAccount>, IamError>;

  async fn set_disabled(&self, id: &ServiceAccountId, disabled: bool) -> Result<(), IamError>;

  async fn update_last_used(&self, id: &ServiceAccountId, at: DateTime<Utc>)
  -> Result<(), IamError>;

  async fn update_secret_hash(
    &self,
    id: &ServiceAccountId,
    secret_hash: &str,
    rotated_at: DateTime<Utc>,
  ) -> Result<(), IamError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
  async fn create(&self, input: &NewSession) -> Result<Session, IamError>;

  async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, IamError>;

  /// Lookup by the SHA-256 hex digest of the opaque token. The raw token is
  /// never a store key.
  async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, IamError>;

  async fn revoke(&self, id: &SessionId, at: DateTime<Utc>) -> Result<(), IamError>;

  async fn revoke_by_user_id(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), IamError>;

  async fn revoke_by_service_account_id(
    &self,
    service_account_id: &ServiceAccountId,
    at: DateTime<Utc>,
  ) -> Result<(), IamError>;

  async fn update_last_used(&self, id: &SessionId, at: DateTime<Utc>) -> Result<(), IamError>;

  /// Remove sessions whose expiry has passed; returns how many were removed.
  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IamError>;
}

#[async_trait]
pub trait RevokedTokenRepository: Send + Sync {
  async fn insert(&self, token: &RevokedToken) -> Result<(), IamError>;

  async fn is_revoked(&self, jti: &str) -> Result<bool, IamError>;

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IamError>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
  async fn create(&self, role: &Role) -> Result<Role, IamError>;

  async fn find_by_id(&self, id: &RoleId) -> Result<Option<Role>, IamError>;

  async fn find_by_name(&self, name: &str) -> Result<Option<Role>, IamError>;

  async fn list(&self) -> Result<Vec<Role>, IamError>;

  async fn update(&self, role: &Role) -> Result<Role, IamError>;

  async fn delete(&self, id: &RoleId) -> Result<(), IamError>;
}

#[async_trait]
pub trait RoleAssignmentRepository: Send + Sync {
  async fn create(&self, input: &NewRoleAssignment) -> Result<RoleAssignment, IamError>;

  async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<RoleAssignment>, IamError>;

  async fn list_for_service_account(
    &self,
    service_account_id: &ServiceAccountId,
  ) -> Result<Vec<RoleAssignment>, IamError>;

  /// Delete the assignment matching the given principal/role pair; returns
  /// whether a row existed.
  async fn delete_for_principal(
    &self,
    input: &NewRoleAssignment,
  ) -> Result<bool, IamError>;

  /// Compensation hook: remove a row by its primary key.
  async fn delete_by_id(&self, id: &str) -> Result<(), IamError>;
}

#[async_trait]
pub trait GroupRoleBindingRepository: Send + Sync {
  async fn create(&self, input: &NewGroupRoleBinding) -> Result<GroupRoleBinding, IamError>;

  async fn list_all(&self) -> Result<Vec<GroupRoleBinding>, IamError>;

  /// Delete the binding for the given group/role pair; returns whether a row
  /// existed.
  async fn delete(&self, group_name: &str, role_id: &RoleId) -> Result<bool, IamError>;

  /// Compensation hook: remove a row by its primary key.
  async fn delete_by_id(&self, id: &str) -> Result<(), IamError>;
}
