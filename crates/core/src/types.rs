use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    Subdomain,
    "A tenant identifier: the subdomain fronting one self-hosted Eclosion instance."
);
newtype_string!(TriggerSlug, "Identifies a trigger kind (e.g. `goal_achieved`).");
newtype_string!(ActionSlug, "Identifies an action kind (e.g. `budget_to`).");
newtype_string!(QuerySlug, "Identifies a query kind (e.g. `budget_summary`).");
newtype_string!(FieldSlug, "Identifies a cached field-option list (e.g. `category`).");
newtype_string!(EventId, "A unique trigger-event identifier.");
newtype_string!(
    TriggerIdentity,
    "IFTTT's stable id for one configured applet instance; the unit of subscription."
);

impl Subdomain {
    /// The reserved tenant used by IFTTT's endpoint verification suite.
    pub const IFTTT_TEST: &'static str = "ifttt-test";

    /// The reserved demo tenant whose approval is a password check.
    pub const DEMO: &'static str = "demo";

    /// Whether this subdomain is the reserved demo tenant.
    #[must_use]
    pub fn is_demo(&self) -> bool {
        self.0 == Self::DEMO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_from_str() {
        let sub = Subdomain::from("acme");
        assert_eq!(sub.as_str(), "acme");
        assert_eq!(&*sub, "acme");
    }

    #[test]
    fn newtype_serde_roundtrip() {
        let slug = TriggerSlug::new("goal_achieved");
        let json = serde_json::to_string(&slug).unwrap();
        assert_eq!(json, "\"goal_achieved\"");
        let back: TriggerSlug = serde_json::from_str(&json).unwrap();
        assert_eq!(back, slug);
    }

    #[test]
    fn demo_detection() {
        assert!(Subdomain::from("demo").is_demo());
        assert!(!Subdomain::from("acme").is_demo());
    }
}
