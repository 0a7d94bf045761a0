use serde::{Deserialize, Serialize};

use super::{Cardinality, Identifier};

/// Type of an element's value slot or of one of its named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FieldSpec {
    Identifiable {
        identifier: Identifier,
        /// Narrowed identifier when the field is constrained to a subtype.
        #[serde(
            default,
            rename = "effectiveIdentifier",
            skip_serializing_if = "Option::is_none"
        )]
        effective_identifier: Option<Identifier>,
        #[serde(default)]
        card: Cardinality,
        /// Declared includes-type constraints.
        #[serde(
            default,
            rename = "includesTypes",
            skip_serializing_if = "Vec::is_empty"
        )]
        includes_types: Vec<Identifier>,
    },
    Choice {
        options: Vec<FieldSpec>,
        #[serde(default)]
        card: Cardinality,
    },
    Reference {
        identifier: Identifier,
        #[serde(default)]
        card: Cardinality,
    },
    Placeholder {
        #[serde(default)]
        text: String,
        #[serde(default)]
        card: Cardinality,
    },
}

impl FieldSpec {
    pub fn identifiable(identifier: Identifier, card: Cardinality) -> Self {
        Self::Identifiable {
            identifier,
            effective_identifier: None,
            card,
            includes_types: Vec::new(),
        }
    }

    pub fn reference(identifier: Identifier, card: Cardinality) -> Self {
        Self::Reference { identifier, card }
    }

    pub fn choice(options: Vec<FieldSpec>, card: Cardinality) -> Self {
        Self::Choice { options, card }
    }

    pub fn with_effective_identifier(mut self, effective: Identifier) -> Self {
        if let Self::Identifiable {
            effective_identifier,
            ..
        } = &mut self
        {
            *effective_identifier = Some(effective);
        }
        self
    }

    pub fn with_includes_types(mut self, types: Vec<Identifier>) -> Self {
        if let Self::Identifiable { includes_types, .. } = &mut self {
            *includes_types = types;
        }
        self
    }

    pub fn card(&self) -> Cardinality {
        match self {
            Self::Identifiable { card, .. }
            | Self::Choice { card, .. }
            | Self::Reference { card, .. }
            | Self::Placeholder { card, .. } => *card,
        }
    }

    pub fn is_list(&self) -> bool {
        self.card().is_list()
    }

    /// The identifier mappings are matched against. Choices and placeholders have none.
    pub fn effective_identifier(&self) -> Option<&Identifier> {
        match self {
            Self::Identifiable {
                identifier,
                effective_identifier,
                ..
            } => Some(effective_identifier.as_ref().unwrap_or(identifier)),
            Self::Reference { identifier, .. } => Some(identifier),
            Self::Choice { .. } | Self::Placeholder { .. } => None,
        }
    }

    pub fn includes_type_count(&self) -> usize {
        match self {
            Self::Identifiable { includes_types, .. } => includes_types.len(),
            _ => 0,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }

    pub fn is_primitive(&self) -> bool {
        self.effective_identifier()
            .is_some_and(Identifier::is_primitive)
    }

    /// Instance accessor for this field, derived from its effective identifier.
    pub fn accessor_name(&self) -> Option<String> {
        self.effective_identifier().map(Identifier::accessor_name)
    }

    /// Choice options that are not placeholders.
    pub fn concrete_options(&self) -> Vec<&FieldSpec> {
        match self {
            Self::Choice { options, .. } => options
                .iter()
                .filter(|option| !matches!(option, Self::Placeholder { .. }))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One object-model element definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDef {
    pub identifier: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldSpec>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default, rename = "isEntry")]
    pub is_entry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ElementDef {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            base: None,
            value: None,
            fields: Vec::new(),
            is_entry: false,
            description: None,
        }
    }

    pub fn with_base(mut self, base: Identifier) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_value(mut self, value: FieldSpec) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn as_entry(mut self) -> Self {
        self.is_entry = true;
        self
    }

    /// Own field whose effective identifier equals `identifier`.
    pub fn field_for(&self, identifier: &Identifier) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|field| field.effective_identifier() == Some(identifier))
    }

    pub fn has_primitive_value(&self) -> bool {
        self.value.as_ref().is_some_and(FieldSpec::is_primitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_identifier_prefers_narrowed_type() {
        let spec = FieldSpec::identifiable(
            Identifier::new("shr.core", "Quantity"),
            Cardinality::optional(),
        )
        .with_effective_identifier(Identifier::new("shr.core", "SimpleQuantity"));

        assert_eq!(
            spec.effective_identifier(),
            Some(&Identifier::new("shr.core", "SimpleQuantity"))
        );
    }

    #[test]
    fn test_choice_has_no_effective_identifier() {
        let spec = FieldSpec::choice(
            vec![
                FieldSpec::identifiable(Identifier::primitive("boolean"), Cardinality::optional()),
                FieldSpec::Placeholder {
                    text: "TBD".to_string(),
                    card: Cardinality::optional(),
                },
            ],
            Cardinality::optional(),
        );
        assert!(spec.effective_identifier().is_none());
        assert_eq!(spec.concrete_options().len(), 1);
    }

    #[test]
    fn test_element_def_serde_shape() {
        let def = ElementDef::new(Identifier::new("shr.simple", "StringValue"))
            .with_value(FieldSpec::identifiable(
                Identifier::primitive("string"),
                Cardinality::required(),
            ));

        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["value"]["kind"], "identifiable");
        let back: ElementDef = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
        assert!(back.has_primitive_value());
    }
}
