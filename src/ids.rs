//! String identifiers shared across the knowledge base and sessions.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
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

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a monitorable quantity, e.g. `oil_pressure`
    ParameterId
);
string_id!(
    /// Identifier of a controller profile, e.g. `dse-7320`
    ControllerId
);
string_id!(
    /// Unique fault code, e.g. `DSE-101`
    FaultCodeId
);
string_id!(
    /// Diagnostic session handle
    SessionId
);

impl SessionId {
    /// Fresh random session id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_borrow_lookup_by_str() {
        let mut map = BTreeMap::new();
        map.insert(ParameterId::from("oil_pressure"), 1);
        assert_eq!(map.get("oil_pressure"), Some(&1));
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let code = FaultCodeId::new("DSE-101");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"DSE-101\"");
    }

    #[test]
    fn test_generated_session_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
