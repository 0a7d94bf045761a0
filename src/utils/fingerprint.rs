use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::plan::{Direction, TransformationPlan};
use crate::types::Identifier;

/// Plan fingerprint for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanFingerprint {
    pub element: Identifier,
    pub direction: Direction,
    /// SHA-256 hash of the serialized operations
    pub content_hash: String,
}

impl PlanFingerprint {
    pub fn new(element: Identifier, direction: Direction, content_hash: String) -> Self {
        Self {
            element,
            direction,
            content_hash,
        }
    }

    /// Check if this fingerprint matches another
    pub fn matches(&self, other: &PlanFingerprint) -> bool {
        self.element == other.element
            && self.direction == other.direction
            && self.content_hash == other.content_hash
    }

    /// Get a short representation of the fingerprint for logging
    pub fn short_hash(&self) -> &str {
        self.content_hash.get(..8).unwrap_or(&self.content_hash)
    }
}

/// Generate a fingerprint for a plan based on its operations
pub fn generate_plan_fingerprint(plan: &TransformationPlan) -> Result<PlanFingerprint> {
    let content = serde_json::to_vec(&plan.operations)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    let content_hash = format!("{:x}", hasher.finalize());

    Ok(PlanFingerprint::new(
        plan.element.clone(),
        plan.direction,
        content_hash,
    ))
}

/// Hash of arbitrary serialized input, used to key compiled plans by their inputs.
pub fn content_hash(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Operation, PathExpr};

    fn plan(value: &str) -> TransformationPlan {
        let mut plan = TransformationPlan::new(Identifier::new("shr.test", "A"), Direction::ToFhir);
        plan.operations.push(Operation::AssignFixed {
            destination: PathExpr::wire().field("resourceType"),
            value: serde_json::json!(value),
        });
        plan
    }

    #[test]
    fn test_plan_fingerprint_matching() {
        let fp1 = generate_plan_fingerprint(&plan("Patient")).unwrap();
        let fp2 = generate_plan_fingerprint(&plan("Patient")).unwrap();
        let fp3 = generate_plan_fingerprint(&plan("Observation")).unwrap();

        assert!(fp1.matches(&fp2));
        assert!(!fp1.matches(&fp3));
        assert_eq!(fp1.short_hash().len(), 8);
    }

    #[test]
    fn test_content_hash_differs() {
        assert_ne!(content_hash(&[b"a"]), content_hash(&[b"b"]));
        assert_eq!(content_hash(&[b"a", b"b"]), content_hash(&[b"ab"]));
    }
}
