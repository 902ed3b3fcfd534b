//! IAM service facade
//!
//! Owns the authenticator chain, the group-role cache and the authorizer;
//! holds shared references to the repositories and the policy engine. All
//! enforcer writes in the system go through the mutation methods on this
//! type; the read path never mutates policy state.

mod roles;
mod service_accounts;
mod sessions;

pub use service_accounts::SECRET_HASH_COST;

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use validator::Validate;

use crate::auth::claims::DEFAULT_GROUPS_CLAIM;
use crate::auth::{AuthRequest, Authenticator, BearerAuthenticator, SessionAuthenticator};
use crate::authorizer::Authorizer;
use crate::cache::{GroupRoleCache, GroupRoleSnapshot};
use crate::config::IamConfig;
use crate::contracts::{
  Attributes, Enforcer, GroupRoleBindingRepository, RevokedTokenRepository,
  RoleAssignmentRepository, RoleRepository, ScopeCompiler, ServiceAccountRepository,
  SessionRepository, TokenParser, UserRepository,
};
use crate::error::IamError;
use crate::models::{
  CreateUser, GroupRoleBinding, Principal, Role, RoleAssignment, ServiceAccount,
  ServiceAccountId, Session, User, UserId,
};
use crate::resolver::{PrincipalKey, RoleResolver};
use crate::token::OidcTokenParser;

/// Store repositories the service consumes. Grouped so construction sites
/// stay readable.
#[derive(Clone)]
pub struct Repositories {
  pub users: Arc<dyn UserRepository>,
  pub service_accounts: Arc<dyn ServiceAccountRepository>,
  pub sessions: Arc<dyn SessionRepository>,
  pub revoked_tokens: Arc<dyn RevokedTokenRepository>,
  pub roles: Arc<dyn RoleRepository>,
  pub role_assignments: Arc<dyn RoleAssignmentRepository>,
  pub group_bindings: Arc<dyn GroupRoleBindingRepository>,
}

pub struct IamService {
  repos: Repositories,
  enforcer: Arc<dyn Enforcer>,
  scopes: Arc<dyn ScopeCompiler>,
  cache: Arc<GroupRoleCache>,
  resolver: Arc<RoleResolver>,
  authorizer: Authorizer,
  authenticators: Vec<Arc<dyn Authenticator>>,
}

impl IamService {
  /// Build the service. Fails if the initial group-role snapshot cannot be
  /// constructed; serving requests without one would silently resolve every
  /// principal to an empty group-derived role set.
  pub async fn new(
    repos: Repositories,
    enforcer: Arc<dyn Enforcer>,
    scopes: Arc<dyn ScopeCompiler>,
    config: IamConfig,
  ) -> Result<Self, IamError> {
    let parser = match &config.oidc {
      Some(oidc) => Some(Arc::new(OidcTokenParser::from_config(oidc)?) as Arc<dyn TokenParser>),
      None => None,
    };
    Self::with_token_parser(repos, enforcer, scopes, config, parser).await
  }

  /// Variant with an injected token handler (custom verification backends,
  /// tests). The bearer authenticator is installed only when a parser is
  /// supplied.
  pub async fn with_token_parser(
    repos: Repositories,
    enforcer: Arc<dyn Enforcer>,
    scopes: Arc<dyn ScopeCompiler>,
    config: IamConfig,
    parser: Option<Arc<dyn TokenParser>>,
  ) -> Result<Self, IamError> {
    let cache = Arc::new(
      GroupRoleCache::new(repos.group_bindings.clone(), repos.roles.clone()).await?,
    );
    let resolver = Arc::new(RoleResolver::new(
      repos.role_assignments.clone(),
      repos.roles.clone(),
      cache.clone(),
    ));

    let groups_claim = config
      .oidc
      .as_ref()
      .map(|oidc| oidc.groups_claim.clone())
      .unwrap_or_else(|| DEFAULT_GROUPS_CLAIM.to_string());

    // Fixed priority order: session before bearer.
    let mut authenticators: Vec<Arc<dyn Authenticator>> = vec![Arc::new(SessionAuthenticator::new(
      repos.sessions.clone(),
      repos.users.clone(),
      resolver.clone(),
      config.session_cookie.clone(),
      groups_claim.clone(),
    ))];
    if let Some(parser) = parser {
      let external_idp = config.oidc.as_ref().map(|o| o.external_idp).unwrap_or(false);
      authenticators.push(Arc::new(BearerAuthenticator::new(
        parser,
        repos.users.clone(),
        repos.service_accounts.clone(),
        repos.revoked_tokens.clone(),
        resolver.clone(),
        groups_claim,
        external_idp,
      )));
    }

    Ok(Self {
      authorizer: Authorizer::new(enforcer.clone()),
      repos,
      enforcer,
      scopes,
      cache,
      resolver,
      authenticators,
    })
  }

  // -- request path ---------------------------------------------------------

  /// Try each authenticator in registration order; the first one that finds
  /// credentials decides the outcome. `Ok(None)` means no credentials of any
  /// kind were present.
  #[tracing::instrument(skip_all)]
  pub async fn authenticate_request(
    &self,
    request: &AuthRequest,
  ) -> Result<Option<Principal>, IamError> {
    for (index, authenticator) in self.authenticators.iter().enumerate() {
      match authenticator.authenticate(request).await {
        Ok(Some(principal)) => {
          tracing::debug!(
            authenticator = authenticator.name(),
            authenticator_index = index,
            principal_id = %principal.principal_id,
            principal_type = %principal.principal_type,
            "authenticated"
          );
          return Ok(Some(principal));
        }
        Ok(None) => continue,
        Err(err) => {
          tracing::warn!(
            authenticator = authenticator.name(),
            authenticator_index = index,
            error = %err,
            "authentication failed"
          );
          return Err(err);
        }
      }
    }
    Ok(None)
  }

  /// Effective role names for a principal identity plus a group list.
  pub async fn resolve_roles(
    &self,
    key: &PrincipalKey,
    groups: &[String],
  ) -> Result<Vec<String>, IamError> {
    self.resolver.resolve(key, groups).await
  }

  #[tracing::instrument(
    skip(self, principal, attrs),
    fields(principal_id = principal.map(|p| p.principal_id.as_str()))
  )]
  pub async fn authorize(
    &self,
    principal: Option<&Principal>,
    object: &str,
    action: &str,
    attrs: Option<&Attributes>,
  ) -> Result<bool, IamError> {
    self.authorizer.authorize(principal, object, action, attrs).await
  }

  // -- cache management -----------------------------------------------------

  #[tracing::instrument(skip_all)]
  pub async fn refresh_group_role_cache(&self) -> Result<(), IamError> {
    self.cache.refresh().await?;
    tracing::info!(version = self.cache.get().version, "group role cache refreshed");
    Ok(())
  }

  /// By-value copy of the current snapshot so callers cannot perturb the
  /// published mapping.
  pub fn group_role_cache_snapshot(&self) -> GroupRoleSnapshot {
    (*self.cache.get()).clone()
  }

  // -- user administration --------------------------------------------------

  pub async fn create_user(&self, input: &CreateUser) -> Result<User, IamError> {
    input
      .validate()
      .map_err(|e| IamError::InvalidRequest(e.to_string()))?;
    self.repos.users.create(input).await
  }

  /// Disable (or re-enable) a user. Disabled users fail authentication on
  /// their next request; in-flight principals are unaffected.
  pub async fn set_user_disabled(&self, id: &UserId, disabled: bool) -> Result<(), IamError> {
    let disabled_at = disabled.then(chrono::Utc::now);
    self.repos.users.set_disabled(id, disabled_at).await
  }

  // -- read-only lookups ----------------------------------------------------

  pub async fn get_session(&self, id: &crate::models::SessionId) -> Result<Session, IamError> {
    self
      .repos
      .sessions
      .find_by_id(id)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("session {}", id)))
  }

  pub async fn get_user(&self, id: &UserId) -> Result<User, IamError> {
    self
      .repos
      .users
      .find_by_id(id)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("user {}", id)))
  }

  pub async fn get_user_by_subject(&self, subject: &str) -> Result<User, IamError> {
    self
      .repos
      .users
      .find_by_subject(subject)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("user with subject {}", subject)))
  }

  pub async fn list_users(&self) -> Result<Vec<User>, IamError> {
    self.repos.users.list().await
  }

  pub async fn get_role(&self, name: &str) -> Result<Role, IamError> {
    self
      .repos
      .roles
      .find_by_name(name)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("role {}", name)))
  }

  pub async fn list_roles(&self) -> Result<Vec<Role>, IamError> {
    self.repos.roles.list().await
  }

  pub async fn get_service_account(&self, client_id: &str) -> Result<ServiceAccount, IamError> {
    self
      .repos
      .service_accounts
      .find_by_client_id(client_id)
      .await?
      .ok_or_else(|| IamError::NotFound(format!("service account {}", client_id)))
  }

  pub async fn list_service_accounts(&self) -> Result<Vec<ServiceAccount>, IamError> {
    self.repos.service_accounts.list().await
  }

  pub async fn list_role_assignments(
    &self,
    user_id: Option<&UserId>,
    service_account_id: Option<&ServiceAccountId>,
  ) -> Result<Vec<RoleAssignment>, IamError> {
    match (user_id, service_account_id) {
      (Some(user_id), None) => self.repos.role_assignments.list_for_user(user_id).await,
      (None, Some(account_id)) => {
        self
          .repos
          .role_assignments
          .list_for_service_account(account_id)
          .await
      }
      _ => Err(IamError::InvalidRequest(
        "exactly one of user id and service account id must be set".to_string(),
      )),
    }
  }

  pub async fn list_group_bindings(&self) -> Result<Vec<GroupRoleBinding>, IamError> {
    self.repos.group_bindings.list_all().await
  }

  /// Generate the 32-byte, hex-encoded opaque secret used for session
  /// tokens and service-account secrets. Shown once; only hashes persist.
  pub(crate) fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
  }
}

/// Keep the group-role cache converging even if an administrative refresh is
/// missed. Refresh failures are logged and retried on the next tick; the
/// published snapshot stays valid throughout.
pub fn spawn_periodic_cache_refresh(
  service: Arc<IamService>,
  period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; startup already refreshed.
    ticker.tick().await;
    loop {
      ticker.tick().await;
      if let Err(err) = service.refresh_group_role_cache().await {
        tracing::warn!(error = %err, "periodic group role cache refresh failed");
      }
    }
  })
}
