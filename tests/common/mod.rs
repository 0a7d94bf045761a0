use octofhir_shrmap::*;
use serde_json::{Value, json};

pub const BIRTH_SEX_URL: &str = "http://example.com/StructureDefinition/shr-entity-BirthSex-extension";
pub const SYSTOLIC_CODE: &str = "8480-6";
pub const DIASTOLIC_CODE: &str = "8462-4";

#[allow(dead_code)]
pub fn id(namespace: &str, name: &str) -> Identifier {
    Identifier::new(namespace, name)
}

#[allow(dead_code)]
pub fn blood_pressure_id() -> Identifier {
    id("shr.vital", "BloodPressure")
}

#[allow(dead_code)]
pub fn person_id() -> Identifier {
    id("shr.entity", "Person")
}

fn primitive_value(identifier: Identifier, primitive: &str) -> ElementDef {
    ElementDef::new(identifier).with_value(FieldSpec::identifiable(
        Identifier::primitive(primitive),
        Cardinality::required(),
    ))
}

/// Blood pressure, person, deceased choice and birth sex extension elements.
#[allow(dead_code)]
pub fn create_test_graph() -> ObjectModelGraph {
    ObjectModelGraph::from(vec![
        ElementDef::new(blood_pressure_id())
            .as_entry()
            .with_field(FieldSpec::identifiable(id("shr.vital", "Systolic"), Cardinality::optional()))
            .with_field(FieldSpec::identifiable(id("shr.vital", "Diastolic"), Cardinality::optional()))
            .with_field(FieldSpec::reference(person_id(), Cardinality::optional())),
        primitive_value(id("shr.vital", "Systolic"), "decimal"),
        primitive_value(id("shr.vital", "Diastolic"), "decimal"),
        ElementDef::new(person_id())
            .as_entry()
            .with_field(FieldSpec::identifiable(id("shr.entity", "Deceased"), Cardinality::optional()))
            .with_field(FieldSpec::identifiable(id("shr.entity", "BirthSex"), Cardinality::optional()))
            .with_field(FieldSpec::identifiable(id("shr.entity", "Nickname"), Cardinality::unbounded())),
        ElementDef::new(id("shr.entity", "Deceased")).with_value(FieldSpec::choice(
            vec![
                FieldSpec::identifiable(Identifier::primitive("boolean"), Cardinality::required()),
                FieldSpec::identifiable(Identifier::primitive("dateTime"), Cardinality::required()),
            ],
            Cardinality::required(),
        )),
        primitive_value(id("shr.entity", "BirthSex"), "code"),
        primitive_value(id("shr.entity", "Nickname"), "string"),
    ])
}

#[allow(dead_code)]
pub fn coded(code: &str) -> WireTypeEntry {
    WireTypeEntry::new("CodeableConcept").with_fixed(json!({
        "coding": [{"system": "http://loinc.org", "code": code}]
    }))
}

fn component_slice(name: &str, code: &str, target: &str) -> Vec<WireElementNode> {
    vec![
        WireElementNode::new("Observation.component", Cardinality::optional()).with_slice_name(name),
        WireElementNode::new("Observation.component.code", Cardinality::required()).with_type(coded(code)),
        WireElementNode::new("Observation.component.valueQuantity", Cardinality::optional())
            .with_type(WireTypeEntry::new("Quantity")),
        WireElementNode::new("Observation.component.valueQuantity.value", Cardinality::optional())
            .with_type(WireTypeEntry::new("decimal"))
            .with_mapping(MappingAnnotation::parse(target).unwrap()),
    ]
}

/// Observation sliced on `component.code`; `systolic_first` controls slice declaration order.
#[allow(dead_code)]
pub fn blood_pressure_profile_ordered(systolic_first: bool) -> ProfileTree {
    let mut profile = ProfileTree::for_element(&blood_pressure_id(), "Observation")
        .with_element(WireElementNode::new("Observation", Cardinality::unbounded()))
        .with_element(
            WireElementNode::new("Observation.status", Cardinality::required())
                .with_type(WireTypeEntry::new("code")),
        )
        .with_element(
            WireElementNode::new("Observation.subject", Cardinality::optional())
                .with_type(WireTypeEntry::new("Reference").with_target_profile(
                    "http://example.com/StructureDefinition/shr-entity-Person",
                ))
                .with_mapping(MappingAnnotation::parse("<shr.entity.Person>").unwrap()),
        )
        .with_element(
            WireElementNode::new("Observation.component", Cardinality::unbounded())
                .with_slicing(vec!["code".to_string()]),
        )
        .with_element(
            WireElementNode::new("Observation.component.code", Cardinality::required())
                .with_type(WireTypeEntry::new("CodeableConcept")),
        );

    let systolic = component_slice("systolic", SYSTOLIC_CODE, "<shr.vital.Systolic>");
    let diastolic = component_slice("diastolic", DIASTOLIC_CODE, "<shr.vital.Diastolic>");
    let (first, second) = if systolic_first {
        (systolic, diastolic)
    } else {
        (diastolic, systolic)
    };
    profile.elements.extend(first);
    profile.elements.extend(second);
    profile
}

#[allow(dead_code)]
pub fn blood_pressure_profile() -> ProfileTree {
    blood_pressure_profile_ordered(true)
}

#[allow(dead_code)]
pub fn patient_profile() -> ProfileTree {
    ProfileTree::for_element(&person_id(), "Patient")
        .with_url("http://example.com/StructureDefinition/shr-entity-Person")
        .with_element(WireElementNode::new("Patient", Cardinality::unbounded()))
        .with_element(
            WireElementNode::new("Patient.extension", Cardinality::unbounded())
                .with_slicing(vec!["url".to_string()]),
        )
        .with_element(
            WireElementNode::new("Patient.extension", Cardinality::optional())
                .with_slice_name("birthsex")
                .with_type(WireTypeEntry::new("Extension").with_profile(BIRTH_SEX_URL))
                .with_mapping(MappingAnnotation::parse("<shr.entity.BirthSex>").unwrap()),
        )
        .with_element(
            WireElementNode::new("Patient.name", Cardinality::unbounded())
                .with_type(WireTypeEntry::new("HumanName")),
        )
        .with_element(
            WireElementNode::new("Patient.name.given", Cardinality::unbounded())
                .with_type(WireTypeEntry::new("string"))
                .with_mapping(MappingAnnotation::parse("<shr.entity.Nickname>").unwrap()),
        )
        .with_element(
            WireElementNode::new("Patient.deceased[x]", Cardinality::optional())
                .with_type(WireTypeEntry::new("boolean"))
                .with_type(WireTypeEntry::new("dateTime"))
                .with_mapping(MappingAnnotation::parse("<shr.entity.Deceased>").unwrap()),
        )
        .with_element(WireElementNode::new("Patient.photo", Cardinality::prohibited()))
}

#[allow(dead_code)]
pub fn birth_sex_extension() -> ProfileTree {
    ProfileTree::extension_for(&id("shr.entity", "BirthSex"), BIRTH_SEX_URL, ExtensionStyle::Simple)
        .with_element(WireElementNode::new("Extension", Cardinality::unbounded()))
        .with_element(
            WireElementNode::new("Extension.url", Cardinality::required())
                .with_type(WireTypeEntry::new("uri")),
        )
        .with_element(
            WireElementNode::new("Extension.value[x]", Cardinality::required())
                .with_type(WireTypeEntry::new("code")),
        )
}

#[allow(dead_code)]
pub fn create_test_profiles() -> ProfileSet {
    ProfileSet::new(vec![
        blood_pressure_profile(),
        patient_profile(),
        birth_sex_extension(),
    ])
    .unwrap()
}

#[allow(dead_code)]
pub fn create_test_compiler() -> MappingCompiler {
    MappingCompiler::new(create_test_graph(), create_test_profiles())
}

#[allow(dead_code)]
pub fn create_test_interpreter() -> PlanInterpreter {
    PlanInterpreter::from_report(&create_test_compiler().compile_all())
}

#[allow(dead_code)]
pub fn valued(identifier: Identifier, value: Value) -> Instance {
    Instance::new(identifier).with_value(value)
}

#[allow(dead_code)]
pub fn blood_pressure(systolic: f64, diastolic: f64) -> Instance {
    Instance::new(blood_pressure_id())
        .with_field("systolic", valued(id("shr.vital", "Systolic"), json!(systolic)))
        .with_field("diastolic", valued(id("shr.vital", "Diastolic"), json!(diastolic)))
}

#[allow(dead_code)]
pub fn component(code: &str, value: f64) -> Value {
    json!({
        "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
        "valueQuantity": {"value": value}
    })
}

#[allow(dead_code)]
pub fn primitive_of<'a>(instance: &'a Instance, field: &str) -> Option<&'a Value> {
    instance.get(field)?.as_primitive()
}
