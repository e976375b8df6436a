//! Opaque identifier newtypes.
//!
//! Every entity in the data model (spec §3) is identified by an opaque,
//! string-backed id. Wrapping each in its own type keeps a `CallId` from
//! being accidentally passed where a `MessageId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random id with this entity's prefix.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::new_v4()))
            }

            /// Wrap an externally-supplied id (e.g. a carrier-scoped SID).
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(CallId, "call");
opaque_id!(MessageId, "msg");
opaque_id!(BulkJobId, "bulk");
opaque_id!(SubscriberId, "sub");
opaque_id!(NotificationId, "notif");
opaque_id!(DigitEventId, "digit");
opaque_id!(PlanId, "plan");
