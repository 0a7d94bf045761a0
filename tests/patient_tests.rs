mod common;

use common::*;
use octofhir_shrmap::*;
use serde_json::json;

fn person() -> Instance {
    Instance::new(person_id())
        .with_field("birthSex", valued(id("shr.entity", "BirthSex"), json!("F")))
        .with_field(
            "deceased",
            valued(id("shr.entity", "Deceased"), json!("2019-04-01T10:00:00Z")),
        )
        .with_field(
            "nickname",
            vec![
                ShrValue::from(valued(id("shr.entity", "Nickname"), json!("Sam"))),
                ShrValue::from(valued(id("shr.entity", "Nickname"), json!("Sammy"))),
            ],
        )
}

#[test]
fn test_choice_variant_follows_runtime_type() {
    let interpreter = create_test_interpreter();

    let document = interpreter.to_fhir(&person()).unwrap();
    assert_eq!(document["resourceType"], "Patient");
    assert_eq!(document["deceasedDateTime"], "2019-04-01T10:00:00Z");
    assert!(document.get("deceasedBoolean").is_none());

    let alive = Instance::new(person_id())
        .with_field("deceased", valued(id("shr.entity", "Deceased"), json!(false)));
    let document = interpreter.to_fhir(&alive).unwrap();
    assert_eq!(document["deceasedBoolean"], false);
    assert!(document.get("deceasedDateTime").is_none());
}

#[test]
fn test_extension_written_with_url() {
    let interpreter = create_test_interpreter();
    let document = interpreter.to_fhir(&person()).unwrap();

    assert_eq!(
        document["extension"],
        json!([{"url": BIRTH_SEX_URL, "valueCode": "F"}])
    );
}

#[test]
fn test_list_field_iterates_into_repeating_element() {
    let interpreter = create_test_interpreter();
    let document = interpreter.to_fhir(&person()).unwrap();

    assert_eq!(
        document["name"],
        json!([{"given": ["Sam"]}, {"given": ["Sammy"]}])
    );
}

#[test]
fn test_patient_round_trip() {
    let interpreter = create_test_interpreter();
    let original = person();

    let document = interpreter.to_fhir(&original).unwrap();
    let restored = interpreter
        .from_fhir(&person_id(), &document, &NoBundle)
        .unwrap();
    assert_eq!(restored, original);
}

#[test]
fn test_extension_filtered_by_url() {
    let interpreter = create_test_interpreter();
    let document = json!({
        "resourceType": "Patient",
        "extension": [
            {"url": "http://example.com/other", "valueCode": "X"},
            {"url": BIRTH_SEX_URL, "valueCode": "M"}
        ]
    });

    let instance = interpreter
        .from_fhir(&person_id(), &document, &NoBundle)
        .unwrap();
    assert_eq!(primitive_of(&instance, "birthSex"), Some(&json!("M")));
}

#[test]
fn test_extension_element_standalone() {
    let interpreter = create_test_interpreter();
    let birth_sex = valued(id("shr.entity", "BirthSex"), json!("F"));

    let as_extension = interpreter.to_fhir_as(&birth_sex, true).unwrap();
    assert_eq!(as_extension, json!({"url": BIRTH_SEX_URL, "valueCode": "F"}));

    // Invoked as a plain value the element passes its value through.
    let as_value = interpreter.to_fhir_as(&birth_sex, false).unwrap();
    assert_eq!(as_value, json!("F"));

    let restored = interpreter
        .from_fhir_as(&id("shr.entity", "BirthSex"), &as_extension, true, &NoBundle)
        .unwrap();
    assert_eq!(restored, birth_sex);
}

#[test]
fn test_missing_plan_is_an_execution_error() {
    let interpreter = create_test_interpreter();
    let unknown = Instance::new(id("shr.unknown", "Thing"));

    let error = interpreter.to_fhir(&unknown).unwrap_err();
    assert!(matches!(
        error,
        ShrMapError::Execution(ExecutionError::MissingPlan { .. })
    ));
}

#[test]
fn test_recursion_limit_stops_nested_conversion() {
    let interpreter = create_test_interpreter().with_recursion_limit(1);
    let document = interpreter.to_fhir(&person());

    assert!(matches!(
        document,
        Err(ShrMapError::Execution(ExecutionError::RecursionLimit { limit: 1, .. }))
    ));
}
