//! Deterministic subject account identifiers.
//!
//! A subject account id is `hex(SHA256(organization_id + "." + workgroup_id))`,
//! so any party that knows both ids can compute it without coordination and
//! look up an account it did not create.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of an organization's subject account within a workgroup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectAccountId(String);

impl SubjectAccountId {
    /// Derive the id for an (organization, workgroup) pair.
    pub fn derive(organization_id: &str, workgroup_id: &str) -> Self {
        let digest = Sha256::digest(format!("{}.{}", organization_id, workgroup_id).as_bytes());
        Self(hex::encode(digest))
    }

    /// Check a claimed id against the value derived from the pair.
    pub fn matches(&self, organization_id: &str, workgroup_id: &str) -> bool {
        *self == Self::derive(organization_id, workgroup_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubjectAccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<SubjectAccountId> for String {
    fn from(id: SubjectAccountId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_value() {
        // echo -n "org-1.wg-1" | sha256sum
        let id = SubjectAccountId::derive("org-1", "wg-1");
        assert_eq!(id.as_str(), "44a204e4371b4a0313c4176556591d1b438c412554da9f07534f77c2cd571664");
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_pure_function() {
        assert_eq!(
            SubjectAccountId::derive("org-1", "wg-1"),
            SubjectAccountId::derive("org-1", "wg-1")
        );
        assert!(SubjectAccountId::derive("org-1", "wg-1").matches("org-1", "wg-1"));
    }

    #[test]
    fn test_distinct_pairs_distinct_ids() {
        let pairs = [
            ("org-1", "wg-1"),
            ("org-1", "wg-2"),
            ("org-2", "wg-1"),
            ("wg-1", "org-1"),
            ("org-1.wg", "1"),
            ("", "wg-1"),
        ];
        let ids: HashSet<_> = pairs.iter().map(|(o, w)| SubjectAccountId::derive(o, w)).collect();
        assert_eq!(ids.len(), pairs.len());
    }

    #[test]
    fn test_separator_is_part_of_preimage() {
        // Ids containing the separator are ambiguous; platform ids are UUIDs.
        assert_eq!(
            SubjectAccountId::derive("org-1.wg", "1"),
            SubjectAccountId::derive("org-1", "wg.1")
        );
    }
}
