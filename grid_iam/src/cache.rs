//! Lock-free group→role snapshot cache
//!
//! Readers load an immutable snapshot through an atomic pointer; a refresh
//! rebuilds the mapping on a private buffer and publishes it with a single
//! release store. No mutex is ever taken on the read path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::contracts::{GroupRoleBindingRepository, RoleRepository};
use crate::error::IamError;
use crate::models::RoleId;

/// Immutable, versioned mapping from group name to role names.
///
/// `mappings` may contain duplicate role names per group (the store permits
/// multiple bindings resolving to the same name); lookups deduplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRoleSnapshot {
  pub mappings: HashMap<String, Vec<String>>,
  pub created_at: DateTime<Utc>,
  /// Monotonically non-decreasing across publications; for observability,
  /// not correctness.
  pub version: u64,
}

impl GroupRoleSnapshot {
  /// Sentinel returned before the first publication so callers never see a
  /// null snapshot.
  pub fn empty() -> Self {
    Self {
      mappings: HashMap::new(),
      created_at: DateTime::<Utc>::UNIX_EPOCH,
      version: 0,
    }
  }
}

pub struct GroupRoleCache {
  group_bindings: Arc<dyn GroupRoleBindingRepository>,
  roles: Arc<dyn RoleRepository>,
  snapshot: ArcSwap<GroupRoleSnapshot>,
}

impl GroupRoleCache {
  /// Build the cache and perform one synchronous refresh. The process must
  /// not start without an initial snapshot: every request's role resolution
  /// would silently return empty.
  pub async fn new(
    group_bindings: Arc<dyn GroupRoleBindingRepository>,
    roles: Arc<dyn RoleRepository>,
  ) -> Result<Self, IamError> {
    let cache = Self {
      group_bindings,
      roles,
      snapshot: ArcSwap::from_pointee(GroupRoleSnapshot::empty()),
    };
    cache
      .refresh()
      .await
      .map_err(|e| IamError::Init(format!("initial group role snapshot failed: {}", e)))?;
    Ok(cache)
  }

  /// Current snapshot. Never blocks; safe to call from any task.
  pub fn get(&self) -> Arc<GroupRoleSnapshot> {
    self.snapshot.load_full()
  }

  /// Rebuild the mapping from the store and publish it atomically.
  ///
  /// Concurrent callers race harmlessly: the last writer's snapshot wins and
  /// intermediate versions may be skipped. A failed refresh leaves the
  /// current snapshot untouched.
  pub async fn refresh(&self) -> Result<(), IamError> {
    let bindings = self.group_bindings.list_all().await?;

    // Each referenced role is fetched at most once per refresh.
    let mut role_names: HashMap<RoleId, Option<String>> = HashMap::new();
    let mut mappings: HashMap<String, Vec<String>> = HashMap::new();

    for binding in bindings {
      if !role_names.contains_key(&binding.role_id) {
        let name = self
          .roles
          .find_by_id(&binding.role_id)
          .await?
          .map(|role| role.name);
        if name.is_none() {
          tracing::warn!(
            role_id = %binding.role_id,
            group = %binding.group_name,
            "group role binding references a missing role, skipping"
          );
        }
        role_names.insert(binding.role_id.clone(), name);
      }
      if let Some(Some(name)) = role_names.get(&binding.role_id) {
        mappings
          .entry(binding.group_name)
          .or_default()
          .push(name.clone());
      }
    }

    // Version is read at the publication instant (and the swap retried on
    // contention) so a racing refresher can never publish a lower version
    // after a higher one; readers observe a non-decreasing sequence.
    let created_at = Utc::now();
    let published = self.snapshot.rcu(|current| {
      Arc::new(GroupRoleSnapshot {
        mappings: mappings.clone(),
        created_at,
        version: current.version + 1,
      })
    });
    tracing::debug!(version = published.version + 1, "published group role snapshot");
    Ok(())
  }

  /// Deduplicated union of the role names mapped to `groups`, in first-seen
  /// order. Unknown groups contribute nothing.
  pub fn roles_for_groups(&self, groups: &[String]) -> Vec<String> {
    if groups.is_empty() {
      return Vec::new();
    }
    let snapshot = self.snapshot.load();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for group in groups {
      if let Some(role_names) = snapshot.mappings.get(group) {
        for name in role_names {
          if seen.insert(name.clone()) {
            out.push(name.clone());
          }
        }
      }
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{CreateRole, NewGroupRoleBinding};
  use crate::testing::{InMemoryGroupBindings, InMemoryRoles};
  use anyhow::Result;

  async fn seed_role(roles: &InMemoryRoles, name: &str) -> Result<RoleId> {
    let role = roles.insert(&CreateRole::new(name, &["state:read"])).await?;
    Ok(role.id)
  }

  async fn seed_binding(bindings: &InMemoryGroupBindings, group: &str, role_id: &RoleId) {
    bindings
      .create(&NewGroupRoleBinding {
        group_name: group.to_string(),
        role_id: role_id.clone(),
        assigned_by: "test".to_string(),
      })
      .await
      .unwrap();
  }

  async fn test_cache() -> Result<(GroupRoleCache, Arc<InMemoryGroupBindings>, Arc<InMemoryRoles>)>
  {
    let bindings = Arc::new(InMemoryGroupBindings::default());
    let roles = Arc::new(InMemoryRoles::default());
    let cache = GroupRoleCache::new(bindings.clone(), roles.clone()).await?;
    Ok((cache, bindings, roles))
  }

  #[tokio::test]
  async fn construction_should_publish_an_initial_snapshot() -> Result<()> {
    let (cache, _, _) = test_cache().await?;
    let snapshot = cache.get();
    assert_eq!(snapshot.version, 1);
    assert!(snapshot.mappings.is_empty());
    Ok(())
  }

  #[tokio::test]
  async fn refresh_should_map_groups_to_role_names() -> Result<()> {
    let (cache, bindings, roles) = test_cache().await?;
    let viewer = seed_role(&roles, "viewer").await?;
    let editor = seed_role(&roles, "editor").await?;
    seed_binding(&bindings, "platform-engineers", &viewer).await;
    seed_binding(&bindings, "platform-engineers", &editor).await;
    seed_binding(&bindings, "product-engineers", &viewer).await;

    cache.refresh().await?;

    let snapshot = cache.get();
    assert_eq!(snapshot.version, 2);
    assert_eq!(
      snapshot.mappings["platform-engineers"],
      vec!["viewer".to_string(), "editor".to_string()]
    );
    assert_eq!(
      snapshot.mappings["product-engineers"],
      vec!["viewer".to_string()]
    );
    Ok(())
  }

  #[tokio::test]
  async fn roles_for_groups_should_union_and_dedup() -> Result<()> {
    let (cache, bindings, roles) = test_cache().await?;
    let viewer = seed_role(&roles, "viewer").await?;
    let editor = seed_role(&roles, "editor").await?;
    seed_binding(&bindings, "a", &viewer).await;
    seed_binding(&bindings, "b", &viewer).await;
    seed_binding(&bindings, "b", &editor).await;
    cache.refresh().await?;

    let out = cache.roles_for_groups(&["a".to_string(), "b".to_string()]);
    assert_eq!(out, vec!["viewer".to_string(), "editor".to_string()]);

    assert!(cache.roles_for_groups(&[]).is_empty());
    assert!(cache.roles_for_groups(&["unknown".to_string()]).is_empty());
    Ok(())
  }

  #[tokio::test]
  async fn refresh_should_skip_bindings_to_missing_roles() -> Result<()> {
    let (cache, bindings, _) = test_cache().await?;
    seed_binding(&bindings, "ghosts", &RoleId::new("r-deleted")).await;
    cache.refresh().await?;
    assert!(cache.get().mappings.get("ghosts").is_none());
    Ok(())
  }

  #[tokio::test]
  async fn refresh_failure_should_keep_the_published_snapshot() -> Result<()> {
    let (cache, bindings, roles) = test_cache().await?;
    let viewer = seed_role(&roles, "viewer").await?;
    seed_binding(&bindings, "team", &viewer).await;
    cache.refresh().await?;
    let before = cache.get();

    bindings.fail_next_list();
    assert!(cache.refresh().await.is_err());

    let after = cache.get();
    assert_eq!(before.version, after.version);
    assert_eq!(before.mappings, after.mappings);
    Ok(())
  }

  #[tokio::test]
  async fn repeated_refresh_should_be_idempotent_on_mappings() -> Result<()> {
    let (cache, bindings, roles) = test_cache().await?;
    let viewer = seed_role(&roles, "viewer").await?;
    seed_binding(&bindings, "team", &viewer).await;

    cache.refresh().await?;
    let first = cache.get();
    cache.refresh().await?;
    let second = cache.get();

    assert_eq!(first.mappings, second.mappings);
    assert!(second.version > first.version);
    Ok(())
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_readers_should_never_observe_version_regress() -> Result<()> {
    let (cache, bindings, roles) = test_cache().await?;
    let viewer = seed_role(&roles, "viewer").await?;
    seed_binding(&bindings, "team", &viewer).await;

    let cache = Arc::new(cache);
    let mut tasks = Vec::new();

    for _ in 0..4 {
      let cache = cache.clone();
      tasks.push(tokio::spawn(async move {
        let mut last = 0u64;
        for _ in 0..500 {
          let snapshot = cache.get();
          assert!(snapshot.version >= last, "version went backwards");
          last = snapshot.version;
          // Snapshot contents are either empty (sentinel-free initial) or
          // fully formed; a partially built mapping is unobservable.
          for roles in snapshot.mappings.values() {
            assert!(!roles.is_empty());
          }
          let _ = cache.roles_for_groups(&["team".to_string()]);
        }
      }));
    }

    for _ in 0..2 {
      let cache = cache.clone();
      tasks.push(tokio::spawn(async move {
        for _ in 0..50 {
          cache.refresh().await.unwrap();
        }
      }));
    }

    for task in tasks {
      task.await?;
    }
    assert!(cache.get().version >= 2);
    Ok(())
  }
}
