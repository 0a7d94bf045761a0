use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::compiler::VALUE_ACCESSOR;
use crate::error::{Result, ShrMapError};
use crate::profile::capitalize;
use crate::types::Identifier;

const ENTRY_TYPE_KEY: &str = "EntryType";
const ENTRY_ID_KEY: &str = "EntryId";
const VALUE_KEY: &str = "Value";
const REFERENCE_ENTRY_ID: &str = "_EntryId";
const REFERENCE_ENTRY_TYPE: &str = "_EntryType";

/// A live object-model instance: its type plus field values keyed by accessor name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub identifier: Identifier,
    /// Bundle entry id, used when the instance is referenced from another resource.
    #[serde(default, rename = "entryId", skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, ShrValue>,
}

impl Instance {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            entry_id: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = Some(entry_id.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<ShrValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_value(self, value: impl Into<ShrValue>) -> Self {
        self.with_field(VALUE_ACCESSOR, value)
    }

    pub fn get(&self, name: &str) -> Option<&ShrValue> {
        self.fields.get(name)
    }

    pub fn value(&self) -> Option<&ShrValue> {
        self.get(VALUE_ACCESSOR)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Object-model JSON: fields keyed by element name, the type URL under `EntryType`.
    pub fn to_shr_json(&self) -> Value {
        let mut object = Map::new();
        if self.identifier.name != ENTRY_TYPE_KEY {
            object.insert(
                ENTRY_TYPE_KEY.to_string(),
                json!({ VALUE_KEY: self.identifier.shr_url() }),
            );
        }
        if let Some(entry_id) = &self.entry_id {
            object.insert(ENTRY_ID_KEY.to_string(), json!({ VALUE_KEY: entry_id }));
        }
        for (name, value) in &self.fields {
            object.insert(capitalize(name), value.to_shr_json());
        }
        Value::Object(object)
    }

    /// Reads object-model JSON. `EntryType`, when present, overrides `identifier`.
    pub fn from_shr_json(identifier: &Identifier, json: &Value) -> Result<Self> {
        let object = json.as_object().ok_or_else(|| {
            ShrMapError::parsing(format!("object-model JSON for {identifier} must be an object"))
        })?;
        let identifier = match object.get(ENTRY_TYPE_KEY) {
            Some(entry_type) => type_of(entry_type)?,
            None => identifier.clone(),
        };

        let mut instance = Instance::new(identifier);
        for (key, value) in object {
            match key.as_str() {
                ENTRY_TYPE_KEY => {}
                ENTRY_ID_KEY => instance.entry_id = Some(unwrapped_string(key, value)?),
                _ => {
                    instance
                        .fields
                        .insert(lowercase_first(key), ShrValue::from_shr_json(value)?);
                }
            }
        }
        Ok(instance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum ShrValue {
    Primitive(serde_json::Value),
    Element(Box<Instance>),
    List(Vec<ShrValue>),
    Reference(ReferenceEnvelope),
}

impl ShrValue {
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Element(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Primitive(value) => Some(value),
            Self::Element(instance) => instance.value()?.as_primitive(),
            _ => None,
        }
    }

    /// The value itself, or each item of a list.
    pub fn items(&self) -> Vec<&ShrValue> {
        match self {
            Self::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Primitive(value) => value.is_null(),
            Self::List(items) => items.is_empty(),
            Self::Element(_) | Self::Reference(_) => false,
        }
    }

    pub fn to_shr_json(&self) -> Value {
        match self {
            Self::Primitive(value) => value.clone(),
            Self::Element(instance) => instance.to_shr_json(),
            Self::List(items) => Value::Array(items.iter().map(ShrValue::to_shr_json).collect()),
            Self::Reference(envelope) => json!({
                REFERENCE_ENTRY_ID: envelope.entry_id,
                REFERENCE_ENTRY_TYPE: envelope.entry_type.shr_url(),
            }),
        }
    }

    /// Objects carrying `EntryType` are elements, objects carrying `_EntryId` are references,
    /// anything else is a primitive.
    pub fn from_shr_json(json: &Value) -> Result<Self> {
        match json {
            Value::Array(items) => Ok(Self::List(
                items.iter().map(Self::from_shr_json).collect::<Result<_>>()?,
            )),
            Value::Object(object) if object.contains_key(ENTRY_TYPE_KEY) => {
                let identifier = type_of(&object[ENTRY_TYPE_KEY])?;
                Ok(Instance::from_shr_json(&identifier, json)?.into())
            }
            Value::Object(object) if object.contains_key(REFERENCE_ENTRY_ID) => {
                let entry_id = unwrapped_string(REFERENCE_ENTRY_ID, &object[REFERENCE_ENTRY_ID])?;
                let entry_type = object
                    .get(REFERENCE_ENTRY_TYPE)
                    .ok_or_else(|| {
                        ShrMapError::parsing(format!("reference '{entry_id}' has no {REFERENCE_ENTRY_TYPE}"))
                    })
                    .and_then(type_of)?;
                Ok(Self::Reference(ReferenceEnvelope {
                    container_id: None,
                    entry_id,
                    entry_type,
                    target: None,
                }))
            }
            other => Ok(Self::Primitive(other.clone())),
        }
    }
}

impl From<Instance> for ShrValue {
    fn from(instance: Instance) -> Self {
        Self::Element(Box::new(instance))
    }
}

impl From<serde_json::Value> for ShrValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Primitive(value)
    }
}

impl From<Vec<ShrValue>> for ShrValue {
    fn from(items: Vec<ShrValue>) -> Self {
        Self::List(items)
    }
}

/// A resolved reference: where it points and, when found in the bundle, the decoded target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEnvelope {
    #[serde(default, rename = "containerId", skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(rename = "entryId")]
    pub entry_id: String,
    #[serde(rename = "entryType")]
    pub entry_type: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Box<Instance>>,
}

impl ReferenceEnvelope {
    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

/// Accepts both `"x"` and `{"Value": "x"}`.
fn unwrapped_string(key: &str, value: &Value) -> Result<String> {
    value
        .get(VALUE_KEY)
        .unwrap_or(value)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ShrMapError::parsing(format!("'{key}' must be a string")))
}

fn type_of(entry_type: &Value) -> Result<Identifier> {
    let url = unwrapped_string(ENTRY_TYPE_KEY, entry_type)?;
    Identifier::from_shr_url(&url)
        .ok_or_else(|| ShrMapError::parsing(format!("unrecognized element type URL '{url}'")))
}

fn lowercase_first(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
