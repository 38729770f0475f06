//! Prefixed string identifiers for the billing entities.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

entity_id!(PlanId, "plan");
entity_id!(FeatureId, "feat");
entity_id!(
    /// Identifier of one subscription row; renewals and plan changes mint new ones.
    SubscriptionId,
    "sub"
);
entity_id!(UsageId, "use");
entity_id!(SupplementId, "sup");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = SubscriptionId::generate();
        let b = SubscriptionId::generate();
        assert!(a.as_str().starts_with("sub_"));
        assert_ne!(a, b);
        assert!(PlanId::generate().to_string().starts_with("plan_"));
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = FeatureId::from("feat_api");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"feat_api\"");
    }
}
