//! Policy engine contracts
//!
//! The enforcer is an opaque third-party policy library. Reads happen on the
//! request path (`evaluate` and the reverse lookups); writes happen only on
//! administrative mutation paths, routed exclusively through the IAM
//! service. The engine must support concurrent evaluation during writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IamError;

/// Well-formed attributes object the enforcer evaluates conditions against.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// One policy row: `(subject, object, action, condition, effect)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
  /// Prefixed role identifier (`role:<name>`).
  pub subject: String,
  pub object: String,
  pub action: String,
  /// Attribute expression; empty means unconditional.
  pub condition: String,
  pub effect: String,
}

pub const POLICY_EFFECT_ALLOW: &str = "allow";

#[async_trait]
pub trait Enforcer: Send + Sync {
  /// Evaluate `(subject, object, action, attrs)`; read-only.
  async fn evaluate(
    &self,
    subject: &str,
    object: &str,
    action: &str,
    attrs: &Attributes,
  ) -> Result<bool, IamError>;

  /// Record that `principal` holds `role` (both prefixed identifiers).
  async fn add_grouping(&self, principal: &str, role: &str) -> Result<(), IamError>;

  async fn delete_grouping(&self, principal: &str, role: &str) -> Result<(), IamError>;

  async fn delete_all_groupings_for(&self, principal: &str) -> Result<(), IamError>;

  async fn add_policy(&self, rule: PolicyRule) -> Result<(), IamError>;

  async fn remove_all_policies_for(&self, subject: &str) -> Result<(), IamError>;

  /// Reverse lookup: prefixed principals holding `role`.
  async fn users_for_role(&self, role: &str) -> Result<Vec<String>, IamError>;

  /// Reverse lookup: prefixed roles held by `principal`.
  async fn roles_for_user(&self, principal: &str) -> Result<Vec<String>, IamError>;

  /// Policy rows whose subject is `role`.
  async fn permissions_for_user(&self, subject: &str) -> Result<Vec<PolicyRule>, IamError>;
}

/// Attribute-expression engine used to vet `scope_expr` before a role is
/// persisted.
#[cfg_attr(test, mockall::automock)]
pub trait ScopeCompiler: Send + Sync {
  fn compile(&self, expr: &str) -> Result<(), IamError>;
}
