//! Duck-typed claim extraction
//!
//! Identity providers disagree about where group membership lives; the claim
//! is located by a configurable dot-separated path and tolerates both string
//! arrays and array-of-object shapes. Extraction failure means "no groups",
//! never a validation error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;

pub const DEFAULT_GROUPS_CLAIM: &str = "groups";

/// Pull group names out of a claim set at `path` (e.g. `groups` or
/// `realm_access.groups`). Missing paths, wrong shapes and non-string
/// members all degrade to an empty list.
pub fn extract_groups(claims: &Value, path: &str) -> Vec<String> {
  let mut current = claims;
  for segment in path.split('.') {
    match current.get(segment) {
      Some(next) => current = next,
      None => return Vec::new(),
    }
  }

  match current {
    Value::Array(items) => items
      .iter()
      .filter_map(|item| match item {
        Value::String(name) => Some(name.clone()),
        Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
      })
      .collect(),
    Value::String(name) => vec![name.clone()],
    _ => Vec::new(),
  }
}

/// Non-empty string claim, or `None`.
pub fn string_claim(claims: &Value, key: &str) -> Option<String> {
  claims
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

/// Decode a JWT payload without verifying the signature. Used only for
/// tokens that were verified when the session was created; the stored
/// `id_token` is trusted as far as group membership goes.
pub fn decode_claims_unverified(token: &str) -> Option<Value> {
  let payload = token.split('.').nth(1)?;
  let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
  serde_json::from_slice(&bytes).ok()
}
