//! Effective-role resolution
//!
//! The union of directly-assigned roles and group-derived roles, computed
//! once per authentication. Apart from the identity lookup itself this is
//! the only store access left on the hot path: one assignment query plus
//! memoized role fetches, then a snapshot read.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cache::GroupRoleCache;
use crate::contracts::{RoleAssignmentRepository, RoleRepository};
use crate::error::IamError;
use crate::models::{RoleId, ServiceAccountId, UserId};

/// Which durable record the direct-assignment query keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalKey {
  User(UserId),
  ServiceAccount(ServiceAccountId),
}

pub struct RoleResolver {
  role_assignments: Arc<dyn RoleAssignmentRepository>,
  roles: Arc<dyn RoleRepository>,
  cache: Arc<GroupRoleCache>,
}

impl RoleResolver {
  pub fn new(
    role_assignments: Arc<dyn RoleAssignmentRepository>,
    roles: Arc<dyn RoleRepository>,
    cache: Arc<GroupRoleCache>,
  ) -> Self {
    Self {
      role_assignments,
      roles,
      cache,
    }
  }

  /// Deduplicated role names for `key` unioned with the cached group-derived
  /// roles for `groups`. No ordering guarantee beyond first-seen.
  pub async fn resolve(
    &self,
    key: &PrincipalKey,
    groups: &[String],
  ) -> Result<Vec<String>, IamError> {
    let assignments = match key {
      PrincipalKey::User(id) => self.role_assignments.list_for_user(id).await?,
      PrincipalKey::ServiceAccount(id) => {
        self.role_assignments.list_for_service_account(id).await?
      }
    };

    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut memo: HashMap<RoleId, Option<String>> = HashMap::new();

    for assignment in assignments {
      if !memo.contains_key(&assignment.role_id) {
        let name = self
          .roles
          .find_by_id(&assignment.role_id)
          .await?
          .map(|role| role.name);
        memo.insert(assignment.role_id.clone(), name);
      }
      if let Some(Some(name)) = memo.get(&assignment.role_id) {
        if seen.insert(name.clone()) {
          names.push(name.clone());
        }
      }
    }

    for name in self.cache.roles_for_groups(groups) {
      if seen.insert(name.clone()) {
        names.push(name);
      }
    }

    Ok(names)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::contracts::{GroupRoleBindingRepository, RoleAssignmentRepository};
  use crate::models::{CreateRole, NewGroupRoleBinding, NewRoleAssignment};
  use crate::testing::{InMemoryGroupBindings, InMemoryRoleAssignments, InMemoryRoles};
  use anyhow::Result;

  struct Fixture {
    resolver: RoleResolver,
    assignments: Arc<InMemoryRoleAssignments>,
    bindings: Arc<InMemoryGroupBindings>,
    roles: Arc<InMemoryRoles>,
    cache: Arc<GroupRoleCache>,
  }

  async fn fixture() -> Result<Fixture> {
    let assignments = Arc::new(InMemoryRoleAssignments::default());
    let bindings = Arc::new(InMemoryGroupBindings::default());
    let roles = Arc::new(InMemoryRoles::default());
    let cache = Arc::new(GroupRoleCache::new(bindings.clone(), roles.clone()).await?);
    let resolver = RoleResolver::new(assignments.clone(), roles.clone(), cache.clone());
    Ok(Fixture {
      resolver,
      assignments,
      bindings,
      roles,
      cache,
    })
  }

  #[tokio::test]
  async fn direct_and_group_roles_should_union() -> Result<()> {
    let f = fixture().await?;
    let viewer = f.roles.insert(&CreateRole::new("viewer", &[])).await?;
    let editor = f.roles.insert(&CreateRole::new("editor", &[])).await?;

    let user = UserId::new("u-1");
    f.assignments
      .create(&NewRoleAssignment {
        role_id: viewer.id.clone(),
        user_id: Some(user.clone()),
        service_account_id: None,
        assigned_by: "test".to_string(),
      })
      .await?;
    f.bindings
      .create(&NewGroupRoleBinding {
        group_name: "platform-engineers".to_string(),
        role_id: editor.id.clone(),
        assigned_by: "test".to_string(),
      })
      .await?;
    f.cache.refresh().await?;

    let roles = f
      .resolver
      .resolve(
        &PrincipalKey::User(user),
        &["platform-engineers".to_string()],
      )
      .await?;
    assert_eq!(roles, vec!["viewer".to_string(), "editor".to_string()]);
    Ok(())
  }

  #[tokio::test]
  async fn overlapping_sources_should_dedup() -> Result<()> {
    let f = fixture().await?;
    let viewer = f.roles.insert(&CreateRole::new("viewer", &[])).await?;

    let user = UserId::new("u-1");
    f.assignments
      .create(&NewRoleAssignment {
        role_id: viewer.id.clone(),
        user_id: Some(user.clone()),
        service_account_id: None,
        assigned_by: "test".to_string(),
      })
      .await?;
    f.bindings
      .create(&NewGroupRoleBinding {
        group_name: "team".to_string(),
        role_id: viewer.id.clone(),
        assigned_by: "test".to_string(),
      })
      .await?;
    f.cache.refresh().await?;

    let roles = f
      .resolver
      .resolve(&PrincipalKey::User(user), &["team".to_string()])
      .await?;
    assert_eq!(roles, vec!["viewer".to_string()]);
    Ok(())
  }

  #[tokio::test]
  async fn assignments_to_deleted_roles_should_be_skipped() -> Result<()> {
    let f = fixture().await?;
    let user = UserId::new("u-1");
    f.assignments
      .create(&NewRoleAssignment {
        role_id: RoleId::new("r-gone"),
        user_id: Some(user.clone()),
        service_account_id: None,
        assigned_by: "test".to_string(),
      })
      .await?;

    let roles = f.resolver.resolve(&PrincipalKey::User(user), &[]).await?;
    assert!(roles.is_empty());
    Ok(())
  }

  #[tokio::test]
  async fn service_account_key_should_use_its_own_assignments() -> Result<()> {
    let f = fixture().await?;
    let deployer = f.roles.insert(&CreateRole::new("deployer", &[])).await?;
    let account = ServiceAccountId::new("sa-1");
    f.assignments
      .create(&NewRoleAssignment {
        role_id: deployer.id.clone(),
        user_id: None,
        service_account_id: Some(account.clone()),
        assigned_by: "test".to_string(),
      })
      .await?;

    let roles = f
      .resolver
      .resolve(&PrincipalKey::ServiceAccount(account), &[])
      .await?;
    assert_eq!(roles, vec!["deployer".to_string()]);

    let none = f
      .resolver
      .resolve(&PrincipalKey::User(UserId::new("u-1")), &[])
      .await?;
    assert!(none.is_empty());
    Ok(())
  }
}
