use criterion::{Criterion, criterion_group, criterion_main};
use octofhir_shrmap::*;
use serde_json::json;
use std::hint::black_box;

const FIELDS: usize = 100;

fn record_id() -> Identifier {
    Identifier::new("shr.bench", "Record")
}

fn field_id(index: usize) -> Identifier {
    Identifier::new("shr.bench", format!("Field{index}"))
}

fn create_large_graph() -> ObjectModelGraph {
    let mut record = ElementDef::new(record_id()).as_entry();
    let mut graph = ObjectModelGraph::new();

    for i in 0..FIELDS {
        record = record.with_field(FieldSpec::identifiable(field_id(i), Cardinality::optional()));
        graph.insert(ElementDef::new(field_id(i)).with_value(FieldSpec::identifiable(
            Identifier::primitive("string"),
            Cardinality::required(),
        )));
    }

    graph.with_element(record)
}

fn create_large_profile() -> ProfileTree {
    let mut profile = ProfileTree::for_element(&record_id(), "Basic")
        .with_element(WireElementNode::new("Basic", Cardinality::unbounded()))
        .with_element(
            WireElementNode::new("Basic.extension", Cardinality::unbounded())
                .with_slicing(vec!["url".to_string()]),
        );

    // Every field lands in its own slice of a repeating element
    profile = profile.with_element(
        WireElementNode::new("Basic.identifier", Cardinality::unbounded())
            .with_slicing(vec!["system".to_string()]),
    );
    for i in 0..FIELDS {
        profile = profile
            .with_element(
                WireElementNode::new("Basic.identifier", Cardinality::optional())
                    .with_slice_name(format!("field{i}")),
            )
            .with_element(
                WireElementNode::new("Basic.identifier.system", Cardinality::required()).with_type(
                    WireTypeEntry::new("uri").with_fixed(json!(format!("urn:field:{i}"))),
                ),
            )
            .with_element(
                WireElementNode::new("Basic.identifier.value", Cardinality::optional())
                    .with_type(WireTypeEntry::new("string"))
                    .with_mapping(MappingAnnotation::chain(vec![field_id(i)])),
            );
    }
    profile
}

fn create_compiler() -> MappingCompiler {
    let profiles = ProfileSet::new(vec![create_large_profile()]).unwrap();
    MappingCompiler::new(create_large_graph(), profiles)
}

fn create_instance() -> Instance {
    (0..FIELDS).fold(Instance::new(record_id()), |instance, i| {
        instance.with_field(
            field_id(i).accessor_name(),
            Instance::new(field_id(i)).with_value(json!(format!("value-{i}"))),
        )
    })
}

fn bench_plan_compilation(c: &mut Criterion) {
    let compiler = create_compiler();
    let record = compiler.graph().get(&record_id()).unwrap().clone();

    c.bench_function("compile_sliced_record", |b| {
        b.iter(|| black_box(compiler.compile(&record)).unwrap())
    });

    c.bench_function("compile_all", |b| {
        b.iter(|| black_box(compiler.compile_all()))
    });
}

fn bench_parallel_compilation(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = CompilerConfig::default().with_batch_size(8);

    c.bench_function("parallel_compile_uncached", |b| {
        let compiler = ParallelPlanCompiler::new(MappingCompiler::with_config(
            create_large_graph(),
            ProfileSet::new(vec![create_large_profile()]).unwrap(),
            config.clone(),
        ));
        let elements: Vec<ElementDef> = compiler.compiler().graph().iter().cloned().collect();
        b.iter(|| {
            compiler.clear_cache();
            black_box(runtime.block_on(compiler.compile_batch(elements.clone()))).unwrap()
        })
    });
}

fn bench_plan_execution(c: &mut Criterion) {
    let interpreter = PlanInterpreter::from_report(&create_compiler().compile_all());
    let instance = create_instance();
    let document = interpreter.to_fhir(&instance).unwrap();

    c.bench_function("execute_to_fhir", |b| {
        b.iter(|| black_box(interpreter.to_fhir(&instance)).unwrap())
    });

    c.bench_function("execute_from_fhir", |b| {
        b.iter(|| black_box(interpreter.from_fhir(&record_id(), &document, &NoBundle)).unwrap())
    });
}

fn bench_plan_serialization(c: &mut Criterion) {
    let report = create_compiler().compile_all();

    c.bench_function("plan_json_serialization", |b| {
        b.iter(|| black_box(serde_json::to_string(&report)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_plan_compilation,
    bench_parallel_compilation,
    bench_plan_execution,
    bench_plan_serialization
);
criterion_main!(benches);
