//! Role CRUD, assignments and group bindings
//!
//! Every mutation that touches both the store and the enforcer follows the
//! same compensation protocol: persist first, apply the enforcer write, and
//! on enforcer failure delete the store record again. A compensation failure
//! is logged but never shadows the original error. Mutations that change
//! group bindings finish with a cache refresh.

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::contracts::{PolicyRule, POLICY_EFFECT_ALLOW};
use crate::error::IamError;
use crate::models::{
  group_subject, role_subject, service_account_grouping_id, user_principal_id, CreateRole,
  GroupRoleBinding, NewGroupRoleBinding, NewRoleAssignment, PrincipalType, Role, RoleAssignment,
  RoleId, ServiceAccountId, UpdateRole, UserId,
};

use super::IamService;

impl IamService {
  /// Resolve the enforcer grouping key for an assignment target, enforcing
  /// the exactly-one-principal rule.
  async fn grouping_principal(
    &self,
    user_id: Option<&UserId>,
    service_account_id: Option<&ServiceAccountId>,
  ) -> Result<String, IamError> {
    match (user_id, service_account_id) {
      (Some(user_id), None) => {
        let user = self.get_user(user_id).await?;
        Ok(user_principal_id(user.stable_subject()))
      }
      (None, Some(account_id)) => {
        let account = self
          .repos
          .service_accounts
          .find_by_id(account_id)
          .await?
          .ok_or_else(|| IamError::NotFound(format!("service account {}", account_id)))?;
        Ok(service_account_grouping_id(&account.client_id))
      }
      _ => Err(IamError::InvalidRequest(
        "exactly one of user id and service account id must be set".to_string(),
      )),
    }
  }

  #[tracing::instrument(skip(self), fields(role_id = %role_id))]
  pub async fn assign_user_role(
    &self,
    user_id: Option<&UserId>,
    service_account_id: Option<&ServiceAccountId>,
    role_id: &RoleId,
    assigned_by: &str,
  ) -> Result<RoleAssignment, IamError> {
    let principal = self.grouping_principal(user_id, service_account_id).await?;
    let role = self
      .repos
      .roles
      .find_by_id(role_id)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("role {}", role_id)))?;

    let assignment = self
      .repos
      .role_assignments
      .create(&NewRoleAssignment {
        role_id: role_id.clone(),
        user_id: user_id.cloned(),
        service_account_id: service_account_id.cloned(),
        assigned_by: assigned_by.to_string(),
      })
      .await
      .map_err(|err| match err {
        IamError::UniqueViolation(_) => {
          IamError::AlreadyAssigned(format!("{} already holds role {}", principal, role.name))
        }
        other => other,
      })?;

    if let Err(err) = self
      .enforcer
      .add_grouping(&principal, &role_subject(&role.name))
      .await
    {
      if let Err(comp_err) = self
        .repos
        .role_assignments
        .delete_by_id(&assignment.id)
        .await
      {
        tracing::error!(
          assignment_id = %assignment.id,
          error = %comp_err,
          "compensation failed, assignment row is orphaned"
        );
      }
      return Err(err);
    }

    tracing::info!(principal = %principal, role = %role.name, "role assigned");
    Ok(assignment)
  }

  #[tracing::instrument(skip(self), fields(role_id = %role_id))]
  pub async fn remove_user_role(
    &self,
    user_id: Option<&UserId>,
    service_account_id: Option<&ServiceAccountId>,
    role_id: &RoleId,
  ) -> Result<(), IamError> {
    let principal = self.grouping_principal(user_id, service_account_id).await?;
    let role = self
      .repos
      .roles
      .find_by_id(role_id)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("role {}", role_id)))?;

    let deleted = self
      .repos
      .role_assignments
      .delete_for_principal(&NewRoleAssignment {
        role_id: role_id.clone(),
        user_id: user_id.cloned(),
        service_account_id: service_account_id.cloned(),
        assigned_by: String::new(),
      })
      .await?;
    if !deleted {
      return Err(IamError::NotFound(format!(
        "assignment of role {} to {}",
        role.name, principal
      )));
    }

    self
      .enforcer
      .delete_grouping(&principal, &role_subject(&role.name))
      .await?;
    Ok(())
  }

  #[tracing::instrument(skip(self), fields(group = group_name, role_id = %role_id))]
  pub async fn assign_group_role(
    &self,
    group_name: &str,
    role_id: &RoleId,
    assigned_by: &str,
  ) -> Result<GroupRoleBinding, IamError> {
    let role = self
      .repos
      .roles
      .find_by_id(role_id)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("role {}", role_id)))?;

    let binding = self
      .repos
      .group_bindings
      .create(&NewGroupRoleBinding {
        group_name: group_name.to_string(),
        role_id: role_id.clone(),
        assigned_by: assigned_by.to_string(),
      })
      .await
      .map_err(|err| match err {
        IamError::UniqueViolation(_) => IamError::AlreadyAssigned(format!(
          "group {} already bound to role {}",
          group_name, role.name
        )),
        other => other,
      })?;

    if let Err(err) = self
      .enforcer
      .add_grouping(&group_subject(group_name), &role_subject(&role.name))
      .await
    {
      if let Err(comp_err) = self.repos.group_bindings.delete_by_id(&binding.id).await {
        tracing::error!(
          binding_id = %binding.id,
          error = %comp_err,
          "compensation failed, group binding row is orphaned"
        );
      }
      return Err(err);
    }

    self.refresh_group_role_cache().await?;
    Ok(binding)
  }

  #[tracing::instrument(skip(self), fields(group = group_name, role_id = %role_id))]
  pub async fn remove_group_role(
    &self,
    group_name: &str,
    role_id: &RoleId,
  ) -> Result<(), IamError> {
    let role = self
      .repos
      .roles
      .find_by_id(role_id)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("role {}", role_id)))?;

    let deleted = self.repos.group_bindings.delete(group_name, role_id).await?;
    if !deleted {
      return Err(IamError::NotFound(format!(
        "binding of group {} to role {}",
        group_name, role.name
      )));
    }

    self
      .enforcer
      .delete_grouping(&group_subject(group_name), &role_subject(&role.name))
      .await?;

    self.refresh_group_role_cache().await?;
    Ok(())
  }

  #[tracing::instrument(skip_all, fields(role = %input.name))]
  pub async fn create_role(&self, input: &CreateRole) -> Result<Role, IamError> {
    input
      .validate()
      .map_err(|e| IamError::InvalidRequest(e.to_string()))?;
    if !input.scope_expr.is_empty() {
      self.scopes.compile(&input.scope_expr)?;
    }

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
    let created = self.repos.roles.create(&role).await?;

    if let Err(err) = self.add_role_policies(&created).await {
      if let Err(comp_err) = self.repos.roles.delete(&created.id).await {
        tracing::error!(
          role = %created.name,
          error = %comp_err,
          "compensation failed, role row is orphaned"
        );
      }
      return Err(err);
    }

    tracing::info!(role = %created.name, actions = created.actions.len(), "role created");
    Ok(created)
  }

  /// Write one allow policy per well-formed `"<object>:<action>"` entry.
  /// Malformed action strings are skipped, not fatal.
  async fn add_role_policies(&self, role: &Role) -> Result<(), IamError> {
    let subject = role_subject(&role.name);
    for action in &role.actions {
      let Some((object, act)) = action.split_once(':') else {
        tracing::warn!(role = %role.name, action = %action, "skipping malformed action");
        continue;
      };
      if object.is_empty() || act.is_empty() {
        tracing::warn!(role = %role.name, action = %action, "skipping malformed action");
        continue;
      }
      self
        .enforcer
        .add_policy(PolicyRule {
          subject: subject.clone(),
          object: object.to_string(),
          action: action.clone(),
          condition: role.scope_expr.clone(),
          effect: POLICY_EFFECT_ALLOW.to_string(),
        })
        .await?;
    }
    Ok(())
  }

  /// Optimistic-concurrency role update. The role row commits before the
  /// enforcer policies are reconciled; an enforcer failure after the commit
  /// surfaces as-is and requires operator reconciliation; there is no
  /// automatic rollback here.
  #[tracing::instrument(skip(self, update), fields(role = name))]
  pub async fn update_role(
    &self,
    name: &str,
    expected_version: i32,
    update: &UpdateRole,
  ) -> Result<Role, IamError> {
    let current = self.get_role(name).await?;
    if current.version != expected_version {
      return Err(IamError::VersionMismatch {
        expected: expected_version,
        current: current.version,
      });
    }

    let scope_expr = update.scope_expr.clone().unwrap_or(current.scope_expr);
    if !scope_expr.is_empty() {
      self.scopes.compile(&scope_expr)?;
    }

    let next = Role {
      id: current.id,
      name: current.name,
      description: update.description.clone().unwrap_or(current.description),
      scope_expr,
      create_constraints: update
        .create_constraints
        .clone()
        .unwrap_or(current.create_constraints),
      immutable_keys: update.immutable_keys.clone().unwrap_or(current.immutable_keys),
      version: current.version + 1,
      actions: update.actions.clone().unwrap_or(current.actions),
      created_at: current.created_at,
    };
    let updated = self.repos.roles.update(&next).await?;

    self
      .enforcer
      .remove_all_policies_for(&role_subject(&updated.name))
      .await?;
    self.add_role_policies(&updated).await?;

    Ok(updated)
  }

  /// Delete a role that no principal holds anymore.
  #[tracing::instrument(skip(self), fields(role = name))]
  pub async fn delete_role(&self, name: &str) -> Result<(), IamError> {
    let role = self.get_role(name).await?;
    let subject = role_subject(&role.name);

    let holders = self.enforcer.users_for_role(&subject).await?;
    if !holders.is_empty() {
      return Err(IamError::RoleInUse(format!(
        "role {} still assigned to {} principal(s)",
        role.name,
        holders.len()
      )));
    }

    self.repos.roles.delete(&role.id).await?;
    self.enforcer.remove_all_policies_for(&subject).await?;
    Ok(())
  }

  // -- enforcer reverse lookups --------------------------------------------

  /// Prefixed roles held by a principal. Users are addressed by stable
  /// subject, service accounts by client id.
  pub async fn get_principal_roles(
    &self,
    principal_id: &str,
    principal_type: PrincipalType,
  ) -> Result<Vec<String>, IamError> {
    let key = match principal_type {
      PrincipalType::User => user_principal_id(principal_id),
      PrincipalType::ServiceAccount => service_account_grouping_id(principal_id),
    };
    self.enforcer.roles_for_user(&key).await
  }

  /// Policy rows written for a role.
  pub async fn get_role_permissions(&self, role_name: &str) -> Result<Vec<PolicyRule>, IamError> {
    self
      .enforcer
      .permissions_for_user(&role_subject(role_name))
      .await
  }
}
