pub mod auth;
pub mod authorizer;
pub mod cache;
pub mod config;
pub mod contracts;
pub mod error;
pub mod middlewares;
pub mod models;
pub mod resolver;
pub mod service;
pub mod testing;
pub mod token;

// Re-export core types and traits
pub use auth::{AuthRequest, Authenticator, BearerAuthenticator, SessionAuthenticator,
  SESSION_COOKIE};
pub use authorizer::Authorizer;
pub use cache::{GroupRoleCache, GroupRoleSnapshot};
pub use config::{IamConfig, OidcConfig};
pub use contracts::{
  Attributes, Enforcer, GroupRoleBindingRepository, PolicyRule, RevokedTokenRepository,
  RoleAssignmentRepository, RoleRepository, ScopeCompiler, ServiceAccountRepository,
  SessionRepository, TokenParser, UserRepository,
};
pub use error::{AuthFailure, IamError};
pub use middlewares::{authenticate_middleware, status_for, SetLayer};
pub use models::{
  CreateRole,
  CreateServiceAccount,
  CreateUser,
  GroupRoleBinding,
  // Durable entities
  Principal,
  PrincipalType,
  RevokedToken,
  Role,
  RoleAssignment,
  RoleId,
  ServiceAccount,
  ServiceAccountId,
  Session,
  SessionId,
  UpdateRole,
  User,
  UserId,
};
pub use resolver::{PrincipalKey, RoleResolver};
pub use service::{spawn_periodic_cache_refresh, IamService, Repositories};
pub use token::OidcTokenParser;
