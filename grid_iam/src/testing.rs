//! In-memory collaborator implementations
//!
//! Used by the crate's own tests and by downstream integration tests that
//! need a full IAM service without a database or a real policy engine. The
//! enforcer and binding fakes support one-shot fault injection so
//! compensation paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::contracts::{
  Attributes, Enforcer, GroupRoleBindingRepository, PolicyRule, RevokedTokenRepository,
  RoleAssignmentRepository, RoleRepository, ScopeCompiler, ServiceAccountRepository,
  SessionRepository, TokenParser, UserRepository, POLICY_EFFECT_ALLOW,
};
use crate::error::{AuthFailure, IamError};
use crate::models::{
  CreateRole, CreateServiceAccount, CreateUser, GroupRoleBinding, NewGroupRoleBinding,
  NewRoleAssignment, NewSession, RevokedToken, Role, RoleAssignment, RoleId, ServiceAccount,
  ServiceAccountId, Session, SessionId, User, UserId,
};

fn poisoned(_: impl std::fmt::Debug) -> IamError {
  IamError::Internal("test fixture lock poisoned".to_string())
}

#[derive(Default)]
pub struct InMemoryUsers {
  users: Mutex<Vec<User>>,
}

impl InMemoryUsers {
  pub fn insert(&self, user: User) {
    self.users.lock().unwrap().push(user);
  }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
  async fn create(&self, input: &CreateUser) -> Result<User, IamError> {
    let user = User {
      id: UserId::new(format!("u-{}", Uuid::new_v4())),
      subject: input.subject.clone(),
      email: input.email.clone(),
      name: input.name.clone(),
      password_hash: None,
      disabled_at: None,
      last_login_at: None,
      created_at: Utc::now(),
    };
    self.users.lock().map_err(poisoned)?.push(user.clone());
    Ok(user)
  }

  async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, IamError> {
    Ok(
      self
        .users
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|u| &u.id == id)
        .cloned(),
    )
  }

  async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, IamError> {
    Ok(
      self
        .users
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|u| u.subject.as_deref() == Some(subject))
        .cloned(),
    )
  }

  async fn find_by_email(&self, email: &str) -> Result<Option<User>, IamError> {
    Ok(
      self
        .users
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|u| u.email == email)
        .cloned(),
    )
  }

  async fn list(&self) -> Result<Vec<User>, IamError> {
    Ok(self.users.lock().map_err(poisoned)?.clone())
  }

  async fn set_disabled(
    &self,
    id: &UserId,
    disabled_at: Option<DateTime<Utc>>,
  ) -> Result<(), IamError> {
    let mut users = self.users.lock().map_err(poisoned)?;
    let user = users
      .iter_mut()
      .find(|u| &u.id == id)
      .ok_or_else(|| IamError::NotFound(format!("user {}", id)))?;
    user.disabled_at = disabled_at;
    Ok(())
  }

  async fn update_last_login(&self, id: &UserId, at: DateTime<Utc>) -> Result<(), IamError> {
    let mut users = self.users.lock().map_err(poisoned)?;
    if let Some(user) = users.iter_mut().find(|u| &u.id == id) {
      user.last_login_at = Some(at);
    }
    Ok(())
  }
}

#[derive(Default)]
pub struct InMemoryServiceAccounts {
  accounts: Mutex<Vec<ServiceAccount>>,
}

impl InMemoryServiceAccounts {
  pub fn insert(&self, account: ServiceAccount) {
    self.accounts.lock().unwrap().push(account);
  }
}

#[async_trait]
impl ServiceAccountRepository for InMemoryServiceAccounts {
  async fn create(&self, input: &CreateServiceAccount) -> Result<ServiceAccount, IamError> {
    let mut accounts = self.accounts.lock().map_err(poisoned)?;
    if accounts.iter().any(|a| a.client_id == input.client_id) {
      return Err(IamError::UniqueViolation(format!(
        "service account client id {}",
        input.client_id
      )));
    }
    let account = ServiceAccount {
      id: ServiceAccountId::new(format!("sa-{}", Uuid::new_v4())),
      name: input.name.clone(),
      client_id: input.client_id.clone(),
      client_secret_hash: input.client_secret_hash.clone(),
      description: input.description.clone(),
      disabled: false,
      created_by: input.created_by.clone(),
      secret_rotated_at: Utc::now(),
      last_used_at: None,
      created_at: Utc::now(),
    };
    accounts.push(account.clone());
    Ok(account)
  }

  async fn find_by_id(&self, id: &ServiceAccountId) -> Result<Option<ServiceAccount>, IamError> {
    Ok(
      self
        .accounts
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|a| &a.id == id)
        .cloned(),
    )
  }

  async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ServiceAccount>, IamError> {
    Ok(
      self
        .accounts
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|a| a.client_id == client_id)
        .cloned(),
    )
  }

  async fn find_by_name(&self, name: &str) -> Result<Option<ServiceAccount>, IamError> {
    Ok(
      self
        .accounts
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|a| a.name == name)
        .cloned(),
    )
  }

  async fn list(&self) -> Result<Vec<ServiceAccount>, IamError> {
    Ok(self.accounts.lock().map_err(poisoned)?.clone())
  }

  async fn set_disabled(&self, id: &ServiceAccountId, disabled: bool) -> Result<(), IamError> {
    let mut accounts = self.accounts.lock().map_err(poisoned)?;
    let account = accounts
      .iter_mut()
      .find(|a| &a.id == id)
      .ok_or_else(|| IamError::NotFound(format!("service account {}", id)))?;
    account.disabled = disabled;
    Ok(())
  }

  async fn update_last_used(&self, id: &ServiceAccountId, at: DateTime<Utc>)
  -> Result<(), IamError> {
    let mut accounts = self.accounts.lock().map_err(poisoned)?;
    if let Some(account) = accounts.iter_mut().find(|a| &a.id == id) {
      account.last_used_at = Some(at);
    }
    Ok(())
  }

  async fn update_secret_hash(
    &self,
    id: &ServiceAccountId,
    secret_hash: &str,
    rotated_at: DateTime<Utc>,
  ) -> Result<(), IamError> {
    let mut accounts = self.accounts.lock().map_err(poisoned)?;
    let account = accounts
      .iter_mut()
      .find(|a| &a.id == id)
      .ok_or_else(|| IamError::NotFound(format!("service account {}", id)))?;
    account.client_secret_hash = secret_hash.to_string();
    account.secret_rotated_at = rotated_at;
    Ok(())
  }
}

#[derive(Default)]
pub struct InMemorySessions {
  sessions: Mutex<Vec<Session>>,
}

impl InMemorySessions {
  pub fn insert(&self, session: Session) {
    self.sessions.lock().unwrap().push(session);
  }

  pub fn get(&self, id: &SessionId) -> Option<Session> {
    self.sessions.lock().unwrap().iter().find(|s| &s.id == id).cloned()
  }
}

#[async_trait]
impl SessionRepository for InMemorySessions {
  async fn create(&self, input: &NewSession) -> Result<Session, IamError> {
    let now = Utc::now();
    let session = Session {
      id: SessionId::new(format!("s-{}", Uuid::new_v4())),
      user_id: input.user_id.clone(),
      service_account_id: input.service_account_id.clone(),
      token_hash: input.token_hash.clone(),
      id_token: input.id_token.clone(),
      expires_at: input.expires_at,
      revoked: false,
      last_used_at: now,
      revoked_at: None,
      created_at: now,
    };
    self.sessions.lock().map_err(poisoned)?.push(session.clone());
    Ok(session)
  }

  async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, IamError> {
    Ok(
      self
        .sessions
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|s| &s.id == id)
        .cloned(),
    )
  }

  async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, IamError> {
    Ok(
      self
        .sessions
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|s| s.token_hash == token_hash)
        .cloned(),
    )
  }

  async fn revoke(&self, id: &SessionId, at: DateTime<Utc>) -> Result<(), IamError> {
    let mut sessions = self.sessions.lock().map_err(poisoned)?;
    let session = sessions
      .iter_mut()
      .find(|s| &s.id == id)
      .ok_or_else(|| IamError::NotFound(format!("session {}", id)))?;
    session.revoked = true;
    session.revoked_at = Some(at);
    Ok(())
  }

  async fn revoke_by_user_id(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), IamError> {
    let mut sessions = self.sessions.lock().map_err(poisoned)?;
    for session in sessions.iter_mut().filter(|s| s.user_id.as_ref() == Some(user_id)) {
      session.revoked = true;
      session.revoked_at = Some(at);
    }
    Ok(())
  }

  async fn revoke_by_service_account_id(
    &self,
    service_account_id: &ServiceAccountId,
    at: DateTime<Utc>,
  ) -> Result<(), IamError> {
    let mut sessions = self.sessions.lock().map_err(poisoned)?;
    for session in sessions
      .iter_mut()
      .filter(|s| s.service_account_id.as_ref() == Some(service_account_id))
    {
      session.revoked = true;
      session.revoked_at = Some(at);
    }
    Ok(())
  }

  async fn update_last_used(&self, id: &SessionId, at: DateTime<Utc>) -> Result<(), IamError> {
    let mut sessions = self.sessions.lock().map_err(poisoned)?;
    if let Some(session) = sessions.iter_mut().find(|s| &s.id == id) {
      session.last_used_at = at;
    }
    Ok(())
  }

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IamError> {
    let mut sessions = self.sessions.lock().map_err(poisoned)?;
    let before = sessions.len();
    sessions.retain(|s| s.expires_at > now);
    Ok((before - sessions.len()) as u64)
  }
}

#[derive(Default)]
pub struct InMemoryRevokedTokens {
  tokens: Mutex<Vec<RevokedToken>>,
}

#[async_trait]
impl RevokedTokenRepository for InMemoryRevokedTokens {
  async fn insert(&self, token: &RevokedToken) -> Result<(), IamError> {
    let mut tokens = self.tokens.lock().map_err(poisoned)?;
    if !tokens.iter().any(|t| t.jti == token.jti) {
      tokens.push(token.clone());
    }
    Ok(())
  }

  async fn is_revoked(&self, jti: &str) -> Result<bool, IamError> {
    Ok(self.tokens.lock().map_err(poisoned)?.iter().any(|t| t.jti == jti))
  }

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IamError> {
    let mut tokens = self.tokens.lock().map_err(poisoned)?;
    let before = tokens.len();
    tokens.retain(|t| t.expires_at > now);
    Ok((before - tokens.len()) as u64)
  }
}

#[derive(Default)]
pub struct InMemoryRoles {
  roles: Mutex<Vec<Role>>,
}

impl InMemoryRoles {
  /// Fixture shortcut: build and store a role the way the service would.
  pub async fn insert(&self, input: &CreateRole) -> Result<Role, IamError> {
    let role = Role {
      id: RoleId::new(format!("r-{}", Uuid::new_v4())),
      name: input.name.clone(),
      description: input.description.clone(),
      scope_expr: input.scope_expr.clone(),
      create_constraints: input.create_constraints.clone(),
      immutable_keys: input.immutable_keys.clone(),
      version: 1,
      actions: input.actions.clone(),
      created_at: Utc::now(),
    };
    self.create(&role).await
  }
}

#[async_trait]
impl RoleRepository for InMemoryRoles {
  async fn create(&self, role: &Role) -> Result<Role, IamError> {
    let mut roles = self.roles.lock().map_err(poisoned)?;
    if roles.iter().any(|r| r.name == role.name) {
      return Err(IamError::UniqueViolation(format!("role name {}", role.name)));
    }
    roles.push(role.clone());
    Ok(role.clone())
  }

  async fn find_by_id(&self, id: &RoleId) -> Result<Option<Role>, IamError> {
    Ok(
      self
        .roles
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|r| &r.id == id)
        .cloned(),
    )
  }

  async fn find_by_name(&self, name: &str) -> Result<Option<Role>, IamError> {
    Ok(
      self
        .roles
        .lock()
        .map_err(poisoned)?
        .iter()
        .find(|r| r.name == name)
        .cloned(),
    )
  }

  async fn list(&self) -> Result<Vec<Role>, IamError> {
    Ok(self.roles.lock().map_err(poisoned)?.clone())
  }

  async fn update(&self, role: &Role) -> Result<Role, IamError> {
    let mut roles = self.roles.lock().map_err(poisoned)?;
    let slot = roles
      .iter_mut()
      .find(|r| r.id == role.id)
      .ok_or_else(|| IamError::NotFound(format!("role {}", role.id)))?;
    *slot = role.clone();
    Ok(role.clone())
  }

  async fn delete(&self, id: &RoleId) -> Result<(), IamError> {
    let mut roles = self.roles.lock().map_err(poisoned)?;
    let before = roles.len();
    roles.retain(|r| &r.id != id);
    if roles.len() == before {
      return Err(IamError::NotFound(format!("role {}", id)));
    }
    Ok(())
  }
}

#[derive(Default)]
pub struct InMemoryRoleAssignments {
  assignments: Mutex<Vec<RoleAssignment>>,
}

#[async_trait]
impl RoleAssignmentRepository for InMemoryRoleAssignments {
  async fn create(&self, input: &NewRoleAssignment) -> Result<RoleAssignment, IamError> {
    let mut assignments = self.assignments.lock().map_err(poisoned)?;
    if assignments.iter().any(|a| {
      a.role_id == input.role_id
        && a.user_id == input.user_id
        && a.service_account_id == input.service_account_id
    }) {
      return Err(IamError::UniqueViolation(format!(
        "role assignment for {}",
        input.role_id
      )));
    }
    let assignment = RoleAssignment {
      id: format!("ra-{}", Uuid::new_v4()),
      role_id: input.role_id.clone(),
      user_id: input.user_id.clone(),
      service_account_id: input.service_account_id.clone(),
      assigned_by: input.assigned_by.clone(),
      created_at: Utc::now(),
    };
    assignments.push(assignment.clone());
    Ok(assignment)
  }

  async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<RoleAssignment>, IamError> {
    Ok(
      self
        .assignments
        .lock()
        .map_err(poisoned)?
        .iter()
        .filter(|a| a.user_id.as_ref() == Some(user_id))
        .cloned()
        .collect(),
    )
  }

  async fn list_for_service_account(
    &self,
    service_account_id: &ServiceAccountId,
  ) -> Result<Vec<RoleAssignment>, IamError> {
    Ok(
      self
        .assignments
        .lock()
        .map_err(poisoned)?
        .iter()
        .filter(|a| a.service_account_id.as_ref() == Some(service_account_id))
        .cloned()
        .collect(),
    )
  }

  async fn delete_for_principal(&self, input: &NewRoleAssignment) -> Result<bool, IamError> {
    let mut assignments = self.assignments.lock().map_err(poisoned)?;
    let before = assignments.len();
    assignments.retain(|a| {
      !(a.role_id == input.role_id
        && a.user_id == input.user_id
        && a.service_account_id == input.service_account_id)
    });
    Ok(assignments.len() != before)
  }

  async fn delete_by_id(&self, id: &str) -> Result<(), IamError> {
    self
      .assignments
      .lock()
      .map_err(poisoned)?
      .retain(|a| a.id != id);
    Ok(())
  }
}

#[derive(Default)]
pub struct InMemoryGroupBindings {
  bindings: Mutex<Vec<GroupRoleBinding>>,
  fail_next_list: AtomicBool,
}

impl InMemoryGroupBindings {
  /// Make the next `list_all` fail once with a store error.
  pub fn fail_next_list(&self) {
    self.fail_next_list.store(true, Ordering::SeqCst);
  }
}

#[async_trait]
impl GroupRoleBindingRepository for InMemoryGroupBindings {
  async fn create(&self, input: &NewGroupRoleBinding) -> Result<GroupRoleBinding, IamError> {
    let mut bindings = self.bindings.lock().map_err(poisoned)?;
    if bindings
      .iter()
      .any(|b| b.group_name == input.group_name && b.role_id == input.role_id)
    {
      return Err(IamError::UniqueViolation(format!(
        "group binding {} -> {}",
        input.group_name, input.role_id
      )));
    }
    let binding = GroupRoleBinding {
      id: format!("gb-{}", Uuid::new_v4()),
      group_name: input.group_name.clone(),
      role_id: input.role_id.clone(),
      assigned_by: input.assigned_by.clone(),
      created_at: Utc::now(),
    };
    bindings.push(binding.clone());
    Ok(binding)
  }

  async fn list_all(&self) -> Result<Vec<GroupRoleBinding>, IamError> {
    if self.fail_next_list.swap(false, Ordering::SeqCst) {
      return Err(IamError::Store("injected list failure".to_string()));
    }
    Ok(self.bindings.lock().map_err(poisoned)?.clone())
  }

  async fn delete(&self, group_name: &str, role_id: &RoleId) -> Result<bool, IamError> {
    let mut bindings = self.bindings.lock().map_err(poisoned)?;
    let before = bindings.len();
    bindings.retain(|b| !(b.group_name == group_name && &b.role_id == role_id));
    Ok(bindings.len() != before)
  }

  async fn delete_by_id(&self, id: &str) -> Result<(), IamError> {
    self.bindings.lock().map_err(poisoned)?.retain(|b| b.id != id);
    Ok(())
  }
}

#[derive(Debug, Default)]
struct EnforcerState {
  groupings: Vec<(String, String)>,
  policies: Vec<PolicyRule>,
}

/// Exact-match policy engine stub. `evaluate` ignores conditions and
/// attributes; tests that care about conditions assert on the stored rules.
#[derive(Default)]
pub struct InMemoryEnforcer {
  state: Mutex<EnforcerState>,
  fail_add_grouping: AtomicBool,
  fail_add_policy: AtomicBool,
  fail_evaluate: AtomicBool,
}

impl InMemoryEnforcer {
  pub fn fail_next_add_grouping(&self) {
    self.fail_add_grouping.store(true, Ordering::SeqCst);
  }

  pub fn fail_next_add_policy(&self) {
    self.fail_add_policy.store(true, Ordering::SeqCst);
  }

  pub fn fail_next_evaluate(&self) {
    self.fail_evaluate.store(true, Ordering::SeqCst);
  }

  pub fn groupings(&self) -> Vec<(String, String)> {
    self.state.lock().unwrap().groupings.clone()
  }

  pub fn policies(&self) -> Vec<PolicyRule> {
    self.state.lock().unwrap().policies.clone()
  }
}

#[async_trait]
impl Enforcer for InMemoryEnforcer {
  async fn evaluate(
    &self,
    subject: &str,
    object: &str,
    action: &str,
    _attrs: &Attributes,
  ) -> Result<bool, IamError> {
    if self.fail_evaluate.swap(false, Ordering::SeqCst) {
      return Err(IamError::Enforcer("injected evaluate failure".to_string()));
    }
    let state = self.state.lock().map_err(poisoned)?;
    Ok(state.policies.iter().any(|p| {
      p.subject == subject
        && p.object == object
        && p.action == action
        && p.effect == POLICY_EFFECT_ALLOW
    }))
  }

  async fn add_grouping(&self, principal: &str, role: &str) -> Result<(), IamError> {
    if self.fail_add_grouping.swap(false, Ordering::SeqCst) {
      return Err(IamError::Enforcer(
        "injected add_grouping failure".to_string(),
      ));
    }
    let mut state = self.state.lock().map_err(poisoned)?;
    let pair = (principal.to_string(), role.to_string());
    if !state.groupings.contains(&pair) {
      state.groupings.push(pair);
    }
    Ok(())
  }

  async fn delete_grouping(&self, principal: &str, role: &str) -> Result<(), IamError> {
    let mut state = self.state.lock().map_err(poisoned)?;
    state
      .groupings
      .retain(|(p, r)| !(p == principal && r == role));
    Ok(())
  }

  async fn delete_all_groupings_for(&self, principal: &str) -> Result<(), IamError> {
    let mut state = self.state.lock().map_err(poisoned)?;
    state.groupings.retain(|(p, _)| p != principal);
    Ok(())
  }

  async fn add_policy(&self, rule: PolicyRule) -> Result<(), IamError> {
    if self.fail_add_policy.swap(false, Ordering::SeqCst) {
      return Err(IamError::Enforcer("injected add_policy failure".to_string()));
    }
    self.state.lock().map_err(poisoned)?.policies.push(rule);
    Ok(())
  }

  async fn remove_all_policies_for(&self, subject: &str) -> Result<(), IamError> {
    let mut state = self.state.lock().map_err(poisoned)?;
    state.policies.retain(|p| p.subject != subject);
    Ok(())
  }

  async fn users_for_role(&self, role: &str) -> Result<Vec<String>, IamError> {
    let state = self.state.lock().map_err(poisoned)?;
    Ok(
      state
        .groupings
        .iter()
        .filter(|(_, r)| r == role)
        .map(|(p, _)| p.clone())
        .collect(),
    )
  }

  async fn roles_for_user(&self, principal: &str) -> Result<Vec<String>, IamError> {
    let state = self.state.lock().map_err(poisoned)?;
    Ok(
      state
        .groupings
        .iter()
        .filter(|(p, _)| p == principal)
        .map(|(_, r)| r.clone())
        .collect(),
    )
  }

  async fn permissions_for_user(&self, subject: &str) -> Result<Vec<PolicyRule>, IamError> {
    let state = self.state.lock().map_err(poisoned)?;
    Ok(
      state
        .policies
        .iter()
        .filter(|p| p.subject == subject)
        .cloned()
        .collect(),
    )
  }
}

/// Parenthesis-balance scope checker; enough structure to reject garbage in
/// tests without dragging in a real expression engine.
#[derive(Default)]
pub struct BalancedScopes;

impl ScopeCompiler for BalancedScopes {
  fn compile(&self, expr: &str) -> Result<(), IamError> {
    let mut depth = 0i32;
    for c in expr.chars() {
      match c {
        '(' => depth += 1,
        ')' => {
          depth -= 1;
          if depth < 0 {
            return Err(IamError::InvalidRequest(format!(
              "malformed scope expression: {}",
              expr
            )));
          }
        }
        _ => {}
      }
    }
    if depth != 0 {
      return Err(IamError::InvalidRequest(format!(
        "malformed scope expression: {}",
        expr
      )));
    }
    Ok(())
  }
}

/// Token parser backed by a fixed token→claims table.
#[derive(Default)]
pub struct StaticTokenParser {
  tokens: Mutex<HashMap<String, serde_json::Value>>,
}

impl StaticTokenParser {
  pub fn insert(&self, raw_token: &str, claims: serde_json::Value) {
    self
      .tokens
      .lock()
      .unwrap()
      .insert(raw_token.to_string(), claims);
  }
}

#[async_trait]
impl TokenParser for StaticTokenParser {
  async fn parse(&self, raw_token: &str) -> Result<serde_json::Value, IamError> {
    self
      .tokens
      .lock()
      .map_err(poisoned)?
      .get(raw_token)
      .cloned()
      .ok_or_else(|| {
        IamError::Unauthenticated(AuthFailure::InvalidToken("unknown test token".to_string()))
      })
  }
}
