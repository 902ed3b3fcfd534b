//! Newtype wrappers for the durable record identifiers
//!
//! These types prevent mixing up the different kinds of ids that all travel
//! as opaque strings on the wire.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;

/// User record ID newtype
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Service account record ID newtype
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ServiceAccountId(pub String);

/// Session record ID newtype
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct SessionId(pub String);

/// Role record ID newtype
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct RoleId(pub String);

macro_rules! string_id_impls {
  ($($id:ident),+) => {
    $(
      impl $id {
        pub fn new(id: impl Into<String>) -> Self {
          $id(id.into())
        }

        pub fn as_str(&self) -> &str {
          &self.0
        }
      }

      impl fmt::Display for $id {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
          write!(f, "{}", self.0)
        }
      }

      impl From<String> for $id {
        fn from(id: String) -> Self {
          $id(id)
        }
      }

      impl From<&str> for $id {
        fn from(id: &str) -> Self {
          $id(id.to_string())
        }
      }

      impl From<$id> for String {
        fn from(id: $id) -> Self {
          id.0
        }
      }
    )+
  };
}

string_id_impls!(UserId, ServiceAccountId, SessionId, RoleId);
