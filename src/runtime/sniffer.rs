use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static DATE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\d{4}(-\d{2}(-\d{2})?)?$"));

static DATE_TIME: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?$")
});

fn is_date(text: &str) -> bool {
    DATE.as_ref().is_ok_and(|regex| regex.is_match(text))
}

fn is_date_time(text: &str) -> bool {
    DATE_TIME.as_ref().is_ok_and(|regex| regex.is_match(text))
}

const INTEGER_CODES: &[&str] = &["integer", "positiveInt", "unsignedInt"];
const STRING_CODES: &[&str] = &[
    "string", "code", "id", "uri", "url", "canonical", "markdown", "oid", "uuid", "base64Binary",
];

/// Guesses the wire type code of a JSON value whose type the profile leaves open.
pub trait TypeSniffer: Send + Sync {
    fn sniff(&self, value: &Value) -> Option<String>;

    /// Whether `value` can be read as wire type `code`.
    fn conforms(&self, value: &Value, code: &str) -> bool {
        primitive_conforms(value, code) || self.sniff(value).is_some_and(|sniffed| sniffed == code)
    }
}

/// Sniffs complex types by their distinguishing fields and primitives by JSON kind.
#[derive(Debug, Clone)]
pub struct CatalogSniffer {
    catalog: Vec<(String, Vec<String>)>,
}

impl Default for CatalogSniffer {
    fn default() -> Self {
        let entries: &[(&str, &[&str])] = &[
            ("Reference", &["reference"]),
            ("CodeableConcept", &["coding"]),
            ("Coding", &["system", "code"]),
            ("Quantity", &["value", "unit"]),
            ("Quantity", &["value", "code"]),
            ("Range", &["low", "high"]),
            ("Ratio", &["numerator", "denominator"]),
            ("Period", &["start"]),
            ("Period", &["end"]),
            ("Identifier", &["system", "value"]),
            ("HumanName", &["family"]),
            ("HumanName", &["given"]),
            ("Attachment", &["contentType"]),
            ("Annotation", &["text", "time"]),
        ];
        Self {
            catalog: entries
                .iter()
                .map(|(code, fields)| {
                    (
                        code.to_string(),
                        fields.iter().map(|field| field.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl CatalogSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a complex type recognized by the presence of all `fields`. Earlier entries win.
    pub fn with_entry<I, S>(mut self, code: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog
            .push((code.into(), fields.into_iter().map(Into::into).collect()));
        self
    }
}

impl TypeSniffer for CatalogSniffer {
    fn sniff(&self, value: &Value) -> Option<String> {
        match value {
            Value::Object(object) => {
                if let Some(resource_type) = object.get("resourceType").and_then(Value::as_str) {
                    return Some(resource_type.to_string());
                }
                self.catalog
                    .iter()
                    .find(|(_, fields)| fields.iter().all(|field| object.contains_key(field)))
                    .map(|(code, _)| code.clone())
            }
            Value::Bool(_) => Some("boolean".to_string()),
            Value::Number(number) if number.is_i64() || number.is_u64() => {
                Some("integer".to_string())
            }
            Value::Number(_) => Some("decimal".to_string()),
            Value::String(text) if is_date(text) => Some("date".to_string()),
            Value::String(text) if is_date_time(text) => Some("dateTime".to_string()),
            Value::String(_) => Some("string".to_string()),
            Value::Null | Value::Array(_) => None,
        }
    }
}

fn primitive_conforms(value: &Value, code: &str) -> bool {
    match value {
        Value::Bool(_) => code == "boolean",
        Value::Number(number) => {
            code == "decimal"
                || (INTEGER_CODES.contains(&code) && (number.is_i64() || number.is_u64()))
        }
        Value::String(text) => match code {
            "date" => is_date(text),
            "dateTime" => is_date(text) || is_date_time(text),
            "instant" => is_date_time(text),
            _ => STRING_CODES.contains(&code),
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sniff_complex_types() {
        let sniffer = CatalogSniffer::new();
        assert_eq!(
            sniffer.sniff(&json!({"value": 120.0, "unit": "mm[Hg]"})).as_deref(),
            Some("Quantity")
        );
        assert_eq!(
            sniffer.sniff(&json!({"coding": [{"code": "8480-6"}]})).as_deref(),
            Some("CodeableConcept")
        );
        assert_eq!(
            sniffer.sniff(&json!({"resourceType": "Patient"})).as_deref(),
            Some("Patient")
        );
    }

    #[test]
    fn test_primitive_codes() {
        let sniffer = CatalogSniffer::new();
        assert!(sniffer.conforms(&json!(true), "boolean"));
        assert!(sniffer.conforms(&json!("2019-04-01T10:00:00Z"), "dateTime"));
        assert!(sniffer.conforms(&json!("2019-04-01"), "dateTime"));
        assert!(!sniffer.conforms(&json!("2019-04-01T10:00:00Z"), "date"));
        assert!(!sniffer.conforms(&json!(true), "dateTime"));
        assert!(sniffer.conforms(&json!(3), "integer"));
        assert!(!sniffer.conforms(&json!(3.5), "integer"));
    }

    #[test]
    fn test_custom_entry() {
        let sniffer = CatalogSniffer::new().with_entry("Dosage", ["doseAndRate"]);
        assert_eq!(
            sniffer.sniff(&json!({"doseAndRate": []})).as_deref(),
            Some("Dosage")
        );
    }
}
