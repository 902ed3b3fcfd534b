//! Read-only policy evaluation
//!
//! Iterates a principal's pre-resolved roles and asks the enforcer about
//! each; the first allow wins. Evaluator errors are fatal to the decision:
//! an operational fault must not silently grant (or shop around for) access.

use std::sync::Arc;

use crate::contracts::{Attributes, Enforcer};
use crate::error::IamError;
use crate::models::{role_subject, Principal};

pub struct Authorizer {
  enforcer: Arc<dyn Enforcer>,
}

impl Authorizer {
  pub fn new(enforcer: Arc<dyn Enforcer>) -> Self {
    Self { enforcer }
  }

  /// `Ok(true)` iff at least one of the principal's roles allows
  /// `(object, action, attrs)`. Performs no writes.
  pub async fn authorize(
    &self,
    principal: Option<&Principal>,
    object: &str,
    action: &str,
    attrs: Option<&Attributes>,
  ) -> Result<bool, IamError> {
    let principal = principal
      .ok_or_else(|| IamError::InvalidRequest("authorization requires a principal".to_string()))?;

    if principal.roles.is_empty() {
      tracing::info!(
        principal_id = %principal.principal_id,
        object,
        action,
        "deny: principal has no roles"
      );
      return Ok(false);
    }

    let empty = Attributes::new();
    let attrs = attrs.unwrap_or(&empty);

    for role_name in &principal.roles {
      let subject = role_subject(role_name);
      match self.enforcer.evaluate(&subject, object, action, attrs).await {
        Ok(true) => {
          tracing::debug!(
            principal_id = %principal.principal_id,
            role = %role_name,
            object,
            action,
            "allow"
          );
          return Ok(true);
        }
        Ok(false) => continue,
        Err(err) => {
          return Err(IamError::Enforcer(format!(
            "evaluating role {} for {}: {}",
            role_name, principal.principal_id, err
          )));
        }
      }
    }

    Ok(false)
  }
}
