use serde_json::Value;

const FULL_URL_FIELD: &str = "fullUrl";
const RESOURCE_FIELD: &str = "resource";

/// Locates the resource a reference points to.
pub trait BundleLookup {
    fn find(&self, reference: &str) -> Option<&Value>;
}

/// Bundle entries matched by `fullUrl`; the entry's `resource` is returned when present.
impl BundleLookup for [Value] {
    fn find(&self, reference: &str) -> Option<&Value> {
        self.iter()
            .find(|entry| entry.get(FULL_URL_FIELD).and_then(Value::as_str) == Some(reference))
            .map(|entry| entry.get(RESOURCE_FIELD).unwrap_or(entry))
    }
}

impl BundleLookup for Vec<Value> {
    fn find(&self, reference: &str) -> Option<&Value> {
        self.as_slice().find(reference)
    }
}

/// A lookup that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBundle;

impl BundleLookup for NoBundle {
    fn find(&self, _reference: &str) -> Option<&Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_by_full_url() {
        let entries = vec![
            json!({"fullUrl": "urn:uuid:1", "resource": {"resourceType": "Patient"}}),
            json!({"fullUrl": "urn:uuid:2", "resource": {"resourceType": "Practitioner"}}),
        ];
        let found = entries.find("urn:uuid:2").unwrap();
        assert_eq!(found["resourceType"], "Practitioner");
        assert!(entries.find("urn:uuid:3").is_none());
        assert!(NoBundle.find("urn:uuid:1").is_none());
    }
}
